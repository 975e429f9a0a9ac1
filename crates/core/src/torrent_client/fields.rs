//! Per-download field list for batched metadata fetches.
//!
//! The request builder and the response decoder both walk [`RecordField::ALL`],
//! so the number of calls per download and the slicing of the flat
//! multicall response cannot drift apart.

use std::path::PathBuf;

use reqwest::Url;

use super::types::{TorrentClientError, TorrentRecord};
use crate::rpc::{CallResult, MethodCall, RpcError, Value, ValueExt};

/// One rTorrent attribute fetched per download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    Directory,
    Message,
    IsMultiFile,
    Name,
    TrackerUrl,
    Complete,
    Label,
}

/// Number of multicall entries per download.
pub const FIELDS_PER_RECORD: usize = RecordField::ALL.len();

impl RecordField {
    pub const ALL: [RecordField; 7] = [
        RecordField::Directory,
        RecordField::Message,
        RecordField::IsMultiFile,
        RecordField::Name,
        RecordField::TrackerUrl,
        RecordField::Complete,
        RecordField::Label,
    ];

    pub fn method(self) -> &'static str {
        match self {
            RecordField::Directory => "d.directory",
            RecordField::Message => "d.message",
            RecordField::IsMultiFile => "d.is_multi_file",
            RecordField::Name => "d.name",
            RecordField::TrackerUrl => "t.url",
            RecordField::Complete => "d.complete",
            RecordField::Label => "d.custom1",
        }
    }

    /// The call fetching this field for download `id`.
    pub fn call(self, id: &str) -> MethodCall {
        let target = match self {
            // Tracker commands address the first tracker of the download.
            RecordField::TrackerUrl => format!("{id}:t0"),
            _ => id.to_string(),
        };
        MethodCall::new(self.method(), vec![Value::from(target)])
    }
}

/// All calls for one download, in [`RecordField::ALL`] order.
pub fn record_calls(id: &str) -> impl Iterator<Item = MethodCall> + '_ {
    RecordField::ALL.iter().map(move |field| field.call(id))
}

/// Assemble a record from its slice of multicall results.
///
/// A fault on any field except the tracker URL means the download is gone
/// and is returned as a transport fault.
pub fn decode_record(id: &str, results: Vec<CallResult>) -> Result<TorrentRecord, TorrentClientError> {
    if results.len() != FIELDS_PER_RECORD {
        return Err(TorrentClientError::MalformedResponse(format!(
            "{id}: expected {FIELDS_PER_RECORD} fields, got {}",
            results.len()
        )));
    }

    let mut directory = String::new();
    let mut message = String::new();
    let mut multi_file = false;
    let mut name = String::new();
    let mut tracker_url = String::new();
    let mut complete = false;
    let mut label = String::new();

    for (field, result) in RecordField::ALL.into_iter().zip(results) {
        let value = match (field, result) {
            (_, Ok(value)) => value,
            // Trackerless downloads fault on t.url.
            (RecordField::TrackerUrl, Err(RpcError::Fault { .. })) => continue,
            (_, Err(e)) => return Err(e.into()),
        };
        match field {
            RecordField::Directory => directory = expect_string(id, field, value)?,
            RecordField::Message => message = expect_string(id, field, value)?,
            RecordField::IsMultiFile => multi_file = expect_flag(id, field, &value)?,
            RecordField::Name => name = expect_string(id, field, value)?,
            RecordField::TrackerUrl => tracker_url = expect_string(id, field, value)?,
            RecordField::Complete => complete = expect_flag(id, field, &value)?,
            RecordField::Label => label = expect_string(id, field, value)?,
        }
    }

    let (directory, base_path) = if multi_file {
        // For multi-file downloads d.directory already is the base path.
        let base = PathBuf::from(&directory);
        let parent = base.parent().map(PathBuf::from).unwrap_or_else(|| base.clone());
        (parent, base)
    } else {
        let dir = PathBuf::from(&directory);
        let base = dir.join(&name);
        (dir, base)
    };

    Ok(TorrentRecord {
        id: id.to_string(),
        name,
        tracker_host: tracker_host(&tracker_url),
        directory,
        base_path,
        status_message: message,
        complete,
        label,
    })
}

fn tracker_host(announce: &str) -> String {
    Url::parse(announce)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_default()
}

fn expect_string(id: &str, field: RecordField, value: Value) -> Result<String, TorrentClientError> {
    let kind = value.kind();
    value.into_text().ok_or_else(|| {
        TorrentClientError::MalformedResponse(format!(
            "{id}: {} returned {kind}, expected string",
            field.method()
        ))
    })
}

fn expect_flag(id: &str, field: RecordField, value: &Value) -> Result<bool, TorrentClientError> {
    value.as_flag().ok_or_else(|| {
        TorrentClientError::MalformedResponse(format!(
            "{id}: {} returned {}, expected flag",
            field.method(),
            value.kind()
        ))
    })
}
