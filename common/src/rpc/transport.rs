// Request/response transport for remote procedure calls
//
// `HttpRpcTransport` speaks JSON-RPC 2.0 over HTTP POST with a per-call
// timeout. It does not speak XML-RPC, so it cannot drive a manager that only
// accepts `<methodCall>` documents; a `<methodResponse>` reply is reported as
// a protocol error. Other wire formats plug in as further `RpcTransport` implementations
// and reuse `RpcClient` retries unchanged.

use crate::errors::RpcError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, instrument};

/// End-to-end limit for a single call
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(70);

/// A synchronous request/response channel to one RPC endpoint.
///
/// Implementations own the envelope encoding. Only `RpcError::Transport` is
/// retried by `RpcClient`, so it must mean the peer was not reached.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// URL this transport is bound to
    fn url(&self) -> &str;

    /// Invoke `method` with positional `params` and return the decoded result
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError>;
}

#[derive(Debug, Serialize)]
struct RequestEnvelope<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RemoteFault>,
}

#[derive(Debug, Deserialize)]
struct RemoteFault {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// HTTP transport with a bounded timeout on every call
#[derive(Debug)]
pub struct HttpRpcTransport {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpRpcTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| RpcError::Protocol(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn with_default_timeout(url: impl Into<String>) -> Result<Self, RpcError> {
        Self::new(url, DEFAULT_RPC_TIMEOUT)
    }
}

/// Gateway-class statuses mean the request never reached a live manager
fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

#[async_trait]
impl RpcTransport for HttpRpcTransport {
    fn url(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self, params), fields(url = %self.url))]
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let envelope = RequestEnvelope {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self.client.post(&self.url).json(&envelope).send().await?;

        let status = response.status();
        debug!(method, %status, "RPC response received");
        if is_transient_status(status) {
            return Err(RpcError::Transport(format!(
                "{} returned HTTP {}",
                self.url, status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::Protocol(format!(
                "{} returned HTTP {}: {}",
                self.url, status, body
            )));
        }

        let body = response.bytes().await?;
        let envelope: ResponseEnvelope = serde_json::from_slice(&body).map_err(|e| {
            RpcError::Protocol(format!(
                "{} did not answer with a JSON-RPC envelope: {}",
                self.url, e
            ))
        })?;
        match (envelope.error, envelope.result) {
            (Some(fault), _) => Err(RpcError::Remote {
                code: fault.code,
                message: fault.message,
            }),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}
