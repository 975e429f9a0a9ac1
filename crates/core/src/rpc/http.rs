//! XML-RPC over HTTP(S), the way rTorrent exposes it behind SCGI proxies.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use super::codec::{build_request, decode_response, encode_call};
use super::types::{RpcError, RpcTransport};
use super::value::Value;
use crate::metrics;

/// HTTP transport for an XML-RPC endpoint.
///
/// Credentials embedded in the endpoint URL are stripped from the request
/// URL and sent as basic auth instead.
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    credentials: Option<(String, Option<String>)>,
}

impl HttpTransport {
    /// Create a transport for `url` with a per-request timeout.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let (endpoint, credentials) = split_credentials(url)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Http(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            credentials,
        })
    }

    /// Endpoint with credentials removed.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Separate `user:pass@` from an endpoint URL.
fn split_credentials(url: &str) -> Result<(Url, Option<(String, Option<String>)>), RpcError> {
    let mut endpoint =
        Url::parse(url).map_err(|e| RpcError::InvalidEndpoint(format!("{url}: {e}")))?;
    if !matches!(endpoint.scheme(), "http" | "https") {
        return Err(RpcError::InvalidEndpoint(format!(
            "unsupported scheme {:?}",
            endpoint.scheme()
        )));
    }

    let credentials = if endpoint.username().is_empty() {
        None
    } else {
        let user = decode_component(endpoint.username());
        let pass = endpoint.password().map(decode_component);
        Some((user, pass))
    };

    // Both setters only fail for cannot-be-a-base URLs, which http(s) never are.
    let _ = endpoint.set_username("");
    let _ = endpoint.set_password(None);

    Ok((endpoint, credentials))
}

fn decode_component(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

#[async_trait]
impl RpcTransport for HttpTransport {
    fn name(&self) -> &str {
        "xmlrpc-http"
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        debug!(method, params = params.len(), "XML-RPC call");
        let call = build_request(method, &params);
        let body = encode_call(&call)?;

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", "text/xml")
            .body(body);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, pass.as_ref());
        }

        let result = async {
            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout
                } else {
                    RpcError::Http(e.to_string())
                }
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(RpcError::Status(status.as_u16()));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| RpcError::Http(e.to_string()))?;
            decode_response(&call, bytes.to_vec())
        }
        .await;

        metrics::record_rpc_call(method, result.is_ok());
        result
    }
}
