//! Status message classification.
//!
//! Maps a download's status message to a [`ProblemType`]. Pure: no I/O, no
//! caching, safe to re-run against a re-fetched rule list.

mod rules;

pub use rules::{default_rules, Rule, RuleError, RuleMatcher, RuleSet};

use crate::problem::ProblemType;
use crate::torrent_client::TorrentRecord;

/// rTorrent's message for a completed download whose hash check found
/// unfinished chunks. Always means missing data, whatever the rules say.
pub const MISSING_FILES_MESSAGE: &str =
    "Download registered as completed, but hash check returned unfinished chunks.";

/// Classify a download by its status message.
pub fn classify(record: &TorrentRecord, rules: &RuleSet) -> ProblemType {
    classify_message(&record.status_message, rules)
}

/// Classify a raw status message.
///
/// 1. the missing-files sentinel wins over everything;
/// 2. otherwise the first matching rule, in list order;
/// 3. otherwise any non-empty message not mentioning a timeout is `Unknown`;
/// 4. otherwise `Healthy`.
pub fn classify_message(message: &str, rules: &RuleSet) -> ProblemType {
    let trimmed = message.trim();
    if trimmed == MISSING_FILES_MESSAGE {
        return ProblemType::MissingFiles;
    }

    let lowered = message.to_lowercase();
    if let Some(problem) = rules.first_match(message, &lowered) {
        return problem;
    }

    if !trimmed.is_empty() && !lowered.contains("timed out") {
        return ProblemType::Unknown;
    }

    ProblemType::Healthy
}
