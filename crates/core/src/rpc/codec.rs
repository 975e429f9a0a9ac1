//! XML-RPC request encoding and response decoding.
//!
//! Serialization and parsing are the `xmlrpc` crate's. Its parser only runs
//! behind [`Request::call`], so responses fetched over async HTTP are fed
//! back through a transport that replays the body.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::io::Cursor;

use xmlrpc::{Request, Transport};

use super::types::{MethodCall, RpcError};
use super::value::{Value, ValueExt};

/// Build a request for `method` carrying `params` in order.
pub fn build_request<'a>(method: &'a str, params: &[Value]) -> Request<'a> {
    params
        .iter()
        .cloned()
        .fold(Request::new(method), |request, param| request.arg(param))
}

/// Serialize a request as an XML-RPC body.
pub fn encode_call(request: &Request<'_>) -> Result<Vec<u8>, RpcError> {
    let mut body = Vec::new();
    request
        .write_as_xml(&mut body)
        .map_err(|e| RpcError::Encode(e.to_string()))?;
    Ok(body)
}

/// A response body already read off the wire.
struct Replay(Vec<u8>);

impl Transport for Replay {
    type Stream = Cursor<Vec<u8>>;

    fn transmit(
        self,
        _request: &Request<'_>,
    ) -> Result<Self::Stream, Box<dyn StdError + Send + Sync>> {
        Ok(Cursor::new(self.0))
    }
}

/// Decode the response to `request` into its single return value.
///
/// A `<fault>` response becomes [`RpcError::Fault`].
pub fn decode_response(request: &Request<'_>, body: Vec<u8>) -> Result<Value, RpcError> {
    request.call(Replay(body)).map_err(|e| match e.fault() {
        Some(fault) => RpcError::Fault {
            code: i64::from(fault.fault_code),
            message: fault.fault_string.clone(),
        },
        None => RpcError::Decode(e.to_string()),
    })
}

/// Interpret a `{faultCode, faultString}` struct as an error.
pub(crate) fn fault_from_value(value: &Value) -> Option<RpcError> {
    let members = value.as_struct()?;
    let message = members.get("faultString")?.as_str()?.to_string();
    let code = members
        .get("faultCode")
        .and_then(|code| code.as_integer())
        .unwrap_or(0);
    Some(RpcError::Fault { code, message })
}

/// Build the single `system.multicall` argument for a list of calls.
pub(crate) fn multicall_param(calls: &[MethodCall]) -> Value {
    Value::Array(
        calls
            .iter()
            .map(|call| {
                let mut members = BTreeMap::new();
                members.insert("methodName".to_string(), Value::from(call.method.as_str()));
                members.insert("params".to_string(), Value::Array(call.params.clone()));
                Value::Struct(members)
            })
            .collect(),
    )
}

/// Split a `system.multicall` result into per-call outcomes.
///
/// Successful entries arrive wrapped in a one-element array; failed entries
/// are fault structs.
pub(crate) fn split_multicall(
    response: Value,
    expected: usize,
) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
    let Value::Array(entries) = response else {
        return Err(RpcError::Decode(format!(
            "multicall returned {}, expected array",
            response.kind()
        )));
    };
    if entries.len() != expected {
        return Err(RpcError::Decode(format!(
            "multicall returned {} results for {} calls",
            entries.len(),
            expected
        )));
    }

    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            Value::Array(mut wrapped) if wrapped.len() == 1 => Ok(wrapped.remove(0)),
            other => Err(fault_from_value(&other).unwrap_or_else(|| {
                RpcError::Decode(format!("unexpected multicall entry: {}", other.kind()))
            })),
        })
        .collect())
}
