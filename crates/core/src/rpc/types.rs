//! Types for the RPC transport.

use async_trait::async_trait;
use thiserror::Error;

use super::codec::{multicall_param, split_multicall};
use super::value::Value;

/// Errors raised by the transport layer. Never retried here.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("Invalid RPC endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("RPC endpoint returned HTTP {0}")]
    Status(u16),

    #[error("Request timeout")]
    Timeout,

    #[error("RPC fault {code}: {message}")]
    Fault { code: i64, message: String },

    #[error("Failed to encode RPC request: {0}")]
    Encode(String),

    #[error("Failed to decode RPC response: {0}")]
    Decode(String),
}

/// One method invocation, as sent on its own or inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub params: Vec<Value>,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Per-call outcome within a batch.
pub type CallResult = Result<Value, RpcError>;

/// Request/response transport to the torrent daemon.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Transport name for logging.
    fn name(&self) -> &str;

    /// Issue a single call.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError>;

    /// Issue several calls in one `system.multicall` round trip.
    ///
    /// The outer error covers the round trip itself; individual calls may
    /// still fail, in which case their slot holds the fault. Results keep
    /// request order.
    async fn call_batch(&self, calls: Vec<MethodCall>) -> Result<Vec<CallResult>, RpcError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let expected = calls.len();
        let response = self
            .call("system.multicall", vec![multicall_param(&calls)])
            .await?;
        split_multicall(response, expected)
    }
}
