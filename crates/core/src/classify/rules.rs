//! Classification rules.

use regex_lite::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::problem::ProblemType;

/// Errors compiling a rule list.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Invalid rule pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// How a rule matches a status message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "match_type", rename_all = "snake_case")]
pub enum RuleMatcher {
    /// Case-insensitive containment.
    Substring { substring: String },
    /// Case-insensitive regular expression search.
    Regex { pattern: String },
}

/// One entry of the ordered rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(flatten)]
    pub matcher: RuleMatcher,
    #[serde(rename = "type")]
    pub problem: ProblemType,
}

impl Rule {
    pub fn substring(substring: impl Into<String>, problem: ProblemType) -> Self {
        Self {
            matcher: RuleMatcher::Substring {
                substring: substring.into(),
            },
            problem,
        }
    }

    pub fn regex(pattern: impl Into<String>, problem: ProblemType) -> Self {
        Self {
            matcher: RuleMatcher::Regex {
                pattern: pattern.into(),
            },
            problem,
        }
    }
}

/// Tracker messages that mean the torrent is gone from the tracker.
const UNREGISTERED_SUBSTRINGS: &[&str] = &[
    "unregistered",
    "not registered",
    "this torrent does not exist",
    "trumped",
    "infohash not found",
    "complete season uploaded",
    "torrent not found",
    "nuked",
    "dupe",
    "see: ",
    "has been deleted",
    "problem with file: ",
    "specifically banned",
];

/// Rule list used when the configuration does not provide one.
pub fn default_rules() -> Vec<Rule> {
    UNREGISTERED_SUBSTRINGS
        .iter()
        .map(|s| Rule::substring(*s, ProblemType::Unregistered))
        .collect()
}

#[derive(Debug, Clone)]
enum CompiledMatcher {
    /// Pre-lowercased needle.
    Substring(String),
    Regex(Regex),
}

#[derive(Debug, Clone)]
struct CompiledRule {
    matcher: CompiledMatcher,
    problem: ProblemType,
}

/// A rule list ready for matching, order preserved.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Compile `rules`; fails on the first invalid regex.
    pub fn compile(rules: &[Rule]) -> Result<Self, RuleError> {
        let rules = rules
            .iter()
            .map(|rule| {
                let matcher = match &rule.matcher {
                    RuleMatcher::Substring { substring } => {
                        CompiledMatcher::Substring(substring.to_lowercase())
                    }
                    RuleMatcher::Regex { pattern } => CompiledMatcher::Regex(
                        RegexBuilder::new(pattern)
                            .case_insensitive(true)
                            .build()
                            .map_err(|e| RuleError::InvalidPattern {
                                pattern: pattern.clone(),
                                reason: e.to_string(),
                            })?,
                    ),
                };
                Ok(CompiledRule {
                    matcher,
                    problem: rule.problem,
                })
            })
            .collect::<Result<Vec<_>, RuleError>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First matching rule's type. `lowered` must be `message.to_lowercase()`.
    pub(crate) fn first_match(&self, message: &str, lowered: &str) -> Option<ProblemType> {
        self.rules
            .iter()
            .find(|rule| match &rule.matcher {
                CompiledMatcher::Substring(needle) => lowered.contains(needle.as_str()),
                CompiledMatcher::Regex(re) => re.is_match(message),
            })
            .map(|rule| rule.problem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_rules_from_toml() {
        #[derive(Deserialize)]
        struct Doc {
            rules: Vec<Rule>,
        }
        let doc: Doc = toml::from_str(
            r#"
[[rules]]
match_type = "substring"
substring = "Unregistered"
type = "unregistered"

[[rules]]
match_type = "regex"
pattern = "timed? ?out"
type = "timeout"
"#,
        )
        .unwrap();
        assert_eq!(
            doc.rules,
            vec![
                Rule::substring("Unregistered", ProblemType::Unregistered),
                Rule::regex("timed? ?out", ProblemType::Timeout),
            ]
        );
    }

    #[test]
    fn test_unknown_match_type_is_rejected() {
        let result: Result<Rule, _> =
            serde_json::from_str(r#"{"match_type":"glob","pattern":"*","type":"unknown"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_regex_fails_to_compile() {
        let err = RuleSet::compile(&[Rule::regex("(unclosed", ProblemType::Unknown)]).unwrap_err();
        assert!(matches!(err, RuleError::InvalidPattern { .. }));
    }

    #[test]
    fn test_default_rules_all_unregistered() {
        let rules = default_rules();
        assert_eq!(rules.len(), 13);
        assert!(rules.iter().all(|r| r.problem == ProblemType::Unregistered));
    }

    #[test]
    fn test_first_match_respects_order() {
        let set = RuleSet::compile(&[
            Rule::substring("season", ProblemType::Unknown),
            Rule::substring("complete season uploaded", ProblemType::Unregistered),
        ])
        .unwrap();
        let msg = "Complete Season Uploaded";
        assert_eq!(
            set.first_match(msg, &msg.to_lowercase()),
            Some(ProblemType::Unknown)
        );
    }

    #[test]
    fn test_regex_is_case_insensitive() {
        let set = RuleSet::compile(&[Rule::regex(r"^tracker: \[", ProblemType::Unknown)]).unwrap();
        let msg = "TRACKER: [Failure]";
        assert_eq!(
            set.first_match(msg, &msg.to_lowercase()),
            Some(ProblemType::Unknown)
        );
    }
}
