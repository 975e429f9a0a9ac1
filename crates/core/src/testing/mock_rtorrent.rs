//! In-memory rTorrent session for testing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::rpc::{MethodCall, RpcError, RpcTransport, Value};

/// A download as the mock daemon stores it.
#[derive(Debug, Clone)]
pub struct MockDownload {
    pub id: String,
    pub name: String,
    /// What `d.directory` reports: the base path for multi-file downloads,
    /// the containing directory otherwise.
    pub directory: String,
    pub multi_file: bool,
    pub message: String,
    pub complete: bool,
    /// First tracker announce URL; `None` makes `t.url` fault.
    pub tracker_url: Option<String>,
    pub label: String,
}

impl MockDownload {
    /// On-disk base path of this download.
    pub fn base_path(&self) -> PathBuf {
        if self.multi_file {
            PathBuf::from(&self.directory)
        } else {
            PathBuf::from(&self.directory).join(&self.name)
        }
    }

    /// Set the tracker/daemon message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Mark the download as not finished.
    pub fn incomplete(mut self) -> Self {
        self.complete = false;
        self
    }
}

#[derive(Debug, Default)]
struct MockState {
    downloads: Vec<MockDownload>,
    /// Erased ids still listed for this many more `download_list` calls.
    lingering: HashMap<String, u32>,
    erase_lag: u32,
    erased: Vec<String>,
    calls: Vec<MethodCall>,
    next_error: Option<RpcError>,
    failing_methods: HashMap<String, RpcError>,
    failing_erases: HashMap<String, RpcError>,
    refused_erases: HashSet<String>,
}

/// Mock implementation of the XML-RPC transport backed by a fake session.
///
/// Provides controllable behavior for testing:
/// - Answers `download_list`, `system.multicall`, `d.erase` and the
///   per-download getters
/// - Records every top-level call for assertions
/// - Simulates eventual consistency of erases and transport failures
///
/// # Example
///
/// ```rust,ignore
/// let mock = MockRtorrent::new();
/// mock.add_download(fixtures::download("ABC", "/data")).await;
///
/// let client = RtorrentClient::new(Arc::new(mock.clone()));
/// assert_eq!(client.list_ids().await?, vec!["ABC"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockRtorrent {
    state: Arc<RwLock<MockState>>,
}

impl MockRtorrent {
    /// Create an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a download to the session.
    pub async fn add_download(&self, download: MockDownload) {
        self.state.write().await.downloads.push(download);
    }

    /// Number of downloads currently in the session.
    pub async fn torrent_count(&self) -> usize {
        self.state.read().await.downloads.len()
    }

    /// Check if a download exists.
    pub async fn has_torrent(&self, id: &str) -> bool {
        self.state.read().await.downloads.iter().any(|d| d.id == id)
    }

    /// Keep erased ids visible to the next `polls` listings.
    pub async fn set_erase_lag(&self, polls: u32) {
        self.state.write().await.erase_lag = polls;
    }

    /// Fail the next call with `error`.
    pub async fn set_next_error(&self, error: RpcError) {
        self.state.write().await.next_error = Some(error);
    }

    /// Fail every top-level call to `method` with `error`.
    pub async fn fail_method(&self, method: &str, error: RpcError) {
        self.state
            .write()
            .await
            .failing_methods
            .insert(method.to_string(), error);
    }

    /// Fail any request that would erase `id` with `error`, as a whole.
    pub async fn fail_erase(&self, id: &str, error: RpcError) {
        self.state
            .write()
            .await
            .failing_erases
            .insert(id.to_string(), error);
    }

    /// Answer `d.erase` for `id` with a fault and keep the download.
    ///
    /// Unlike [`MockRtorrent::fail_erase`] the round trip succeeds; only
    /// that call's multicall slot carries the fault.
    pub async fn refuse_erase(&self, id: &str) {
        self.state
            .write()
            .await
            .refused_erases
            .insert(id.to_string());
    }

    /// Every top-level call received so far.
    pub async fn calls(&self) -> Vec<MethodCall> {
        self.state.read().await.calls.clone()
    }

    /// Top-level calls to `method`.
    pub async fn calls_to(&self, method: &str) -> Vec<MethodCall> {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    /// Ids erased so far, in order.
    pub async fn erased(&self) -> Vec<String> {
        self.state.read().await.erased.clone()
    }

    /// Number of `d.erase` invocations, batched or not.
    pub async fn erase_count(&self) -> usize {
        self.state.read().await.erased.len()
    }
}

impl MockState {
    /// Error configured for an erase carried by this request, if any.
    fn erase_failure(&self, method: &str, params: &[Value]) -> Option<RpcError> {
        let erase_target = |name: &str, inner: &[Value]| -> Option<RpcError> {
            if name != "d.erase" {
                return None;
            }
            let id = inner.first().and_then(Value::as_str)?;
            self.failing_erases.get(id).cloned()
        };
        if method != "system.multicall" {
            return erase_target(method, params);
        }
        params
            .first()
            .and_then(Value::as_array)?
            .iter()
            .filter_map(Value::as_struct)
            .find_map(|members| {
                let name = members.get("methodName").and_then(Value::as_str)?;
                let inner = members.get("params").and_then(Value::as_array)?;
                erase_target(name, inner)
            })
    }

    fn find(&self, target: &str) -> Result<&MockDownload, RpcError> {
        self.downloads
            .iter()
            .find(|d| d.id == target)
            .ok_or_else(|| RpcError::Fault {
                code: -501,
                message: "Could not find info-hash.".to_string(),
            })
    }

    fn dispatch(&mut self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        match method {
            "download_list" => {
                let mut ids: Vec<Value> = self
                    .downloads
                    .iter()
                    .map(|d| Value::from(d.id.as_str()))
                    .collect();
                for (id, remaining) in self.lingering.iter_mut() {
                    if *remaining > 0 {
                        ids.push(Value::from(id.as_str()));
                        *remaining -= 1;
                    }
                }
                self.lingering.retain(|_, remaining| *remaining > 0);
                Ok(Value::Array(ids))
            }
            "system.multicall" => {
                let calls = params
                    .first()
                    .and_then(Value::as_array)
                    .ok_or_else(|| fault(-500, "system.multicall expects an array"))?
                    .to_vec();
                let mut results = Vec::with_capacity(calls.len());
                for call in calls {
                    let members = call
                        .as_struct()
                        .ok_or_else(|| fault(-500, "multicall entry is not a struct"))?;
                    let name = members
                        .get("methodName")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let inner = members
                        .get("params")
                        .and_then(Value::as_array)
                        .map(<[Value]>::to_vec)
                        .unwrap_or_default();
                    results.push(match self.dispatch(&name, &inner) {
                        Ok(value) => Value::Array(vec![value]),
                        Err(e) => fault_struct(&e),
                    });
                }
                Ok(Value::Array(results))
            }
            "d.erase" => {
                let id = target(params)?.to_string();
                self.find(&id)?;
                if self.refused_erases.contains(&id) {
                    return Err(fault(-503, "Could not erase download."));
                }
                self.downloads.retain(|d| d.id != id);
                if self.erase_lag > 0 {
                    self.lingering.insert(id.clone(), self.erase_lag);
                }
                self.erased.push(id);
                Ok(Value::Int(0))
            }
            "t.url" => {
                let raw = target(params)?;
                let id = raw.split(':').next().unwrap_or(raw);
                self.find(id)?
                    .tracker_url
                    .clone()
                    .map(Value::from)
                    .ok_or_else(|| fault(-501, "invalid tracker index"))
            }
            getter => {
                let download = self.find(target(params)?)?;
                match getter {
                    "d.directory" => Ok(Value::from(download.directory.as_str())),
                    "d.message" => Ok(Value::from(download.message.as_str())),
                    "d.is_multi_file" => Ok(Value::Int(i32::from(download.multi_file))),
                    "d.name" => Ok(Value::from(download.name.as_str())),
                    "d.complete" => Ok(Value::Int(i32::from(download.complete))),
                    "d.custom1" => Ok(Value::from(download.label.as_str())),
                    other => Err(fault(-506, &format!("Method '{other}' not defined"))),
                }
            }
        }
    }
}

fn target(params: &[Value]) -> Result<&str, RpcError> {
    params
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| fault(-500, "missing target"))
}

fn fault(code: i64, message: &str) -> RpcError {
    RpcError::Fault {
        code,
        message: message.to_string(),
    }
}

fn fault_struct(error: &RpcError) -> Value {
    let (code, message) = match error {
        RpcError::Fault { code, message } => (*code, message.clone()),
        other => (-500, other.to_string()),
    };
    let mut members = BTreeMap::new();
    members.insert("faultCode".to_string(), Value::Int64(code));
    members.insert("faultString".to_string(), Value::String(message));
    Value::Struct(members)
}

#[async_trait]
impl RpcTransport for MockRtorrent {
    fn name(&self) -> &str {
        "mock"
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let mut state = self.state.write().await;
        state.calls.push(MethodCall::new(method, params.clone()));

        if let Some(error) = state.next_error.take() {
            return Err(error);
        }
        if let Some(error) = state.failing_methods.get(method) {
            return Err(error.clone());
        }
        if let Some(error) = state.erase_failure(method, &params) {
            return Err(error);
        }
        state.dispatch(method, &params)
    }
}
