// RPC client with a bounded retry policy for transport failures

use crate::errors::RpcError;
use crate::retry::{FixedDelay, RetryStrategy};
use crate::rpc::transport::{HttpRpcTransport, RpcTransport};
use crate::telemetry;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, instrument, warn};

/// Calls remote operations on one endpoint.
///
/// `call` makes a single attempt. `call_with_retry` is for operations the
/// caller knows are safe to repeat: transport failures are retried per the
/// retry strategy and end in `RpcError::Unreachable`; answers from the
/// remote side, faults included, are returned immediately.
#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
    retry: Arc<dyn RetryStrategy>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("url", &self.transport.url())
            .field("max_attempts", &self.retry.max_attempts())
            .finish()
    }
}

impl RpcClient {
    pub fn new(transport: Arc<dyn RpcTransport>, retry: Arc<dyn RetryStrategy>) -> Self {
        Self { transport, retry }
    }

    /// HTTP client for `url` with the given per-call timeout and the
    /// default retry policy
    pub fn connect(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let transport = HttpRpcTransport::new(url, timeout)?;
        Ok(Self::new(Arc::new(transport), Arc::new(FixedDelay::default())))
    }

    pub fn with_retry(mut self, retry: Arc<dyn RetryStrategy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        telemetry::record_rpc_attempt(method);
        self.transport.call(method, params).await
    }

    #[instrument(skip(self, params), fields(url = %self.url()))]
    pub async fn call_with_retry(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, RpcError> {
        let mut failed_attempts = 0u32;

        loop {
            let err = match self.call(method, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => err,
                Err(err) => return Err(err),
            };

            failed_attempts += 1;
            match self.retry.next_delay(failed_attempts) {
                Some(delay) => {
                    warn!(
                        method,
                        attempt = failed_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "RPC attempt failed, retrying"
                    );
                    telemetry::record_rpc_retry(method);
                    sleep(delay).await;
                }
                None => {
                    error!(
                        method,
                        attempts = failed_attempts,
                        error = %err,
                        "RPC endpoint unreachable"
                    );
                    telemetry::record_rpc_unreachable(method);
                    return Err(RpcError::Unreachable {
                        url: self.url().to_string(),
                        attempts: failed_attempts,
                        last_error: err.to_string(),
                    });
                }
            }
        }
    }

    /// `call_with_retry` decoding the result into `T`
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, RpcError> {
        let value = self.call_with_retry(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::Protocol(format!("Unexpected result for {}: {}", method, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed script of outcomes
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<Result<Value, RpcError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<Result<Value, RpcError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl RpcTransport for ScriptedTransport {
        fn url(&self) -> &str {
            "http://10.0.0.5:40001/abcdefgh"
        }

        async fn call(&self, _method: &str, _params: Vec<Value>) -> Result<Value, RpcError> {
            *self.calls.lock().unwrap() += 1;
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RpcError::Transport("script exhausted".to_string())))
        }
    }

    fn refused() -> Result<Value, RpcError> {
        Err(RpcError::Transport("connection refused".to_string()))
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let transport = ScriptedTransport::new(vec![refused(), refused(), Ok(Value::from(42))]);
        let client = RpcClient::new(transport.clone(), Arc::new(FixedDelay::immediate(4)));

        let value = client.call_with_retry("submit_job", vec![]).await.unwrap();
        assert_eq!(value, Value::from(42));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_is_unreachable() {
        let transport = ScriptedTransport::new(vec![]);
        let client = RpcClient::new(transport.clone(), Arc::new(FixedDelay::immediate(4)));

        match client.call_with_retry("list_jobs", vec![]).await {
            Err(RpcError::Unreachable { url, attempts, .. }) => {
                assert_eq!(url, "http://10.0.0.5:40001/abcdefgh");
                assert_eq!(attempts, 4);
            }
            other => panic!("expected Unreachable, got {:?}", other),
        }
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test]
    async fn test_remote_fault_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(RpcError::Remote {
            code: 3,
            message: "unknown partition".to_string(),
        })]);
        let client = RpcClient::new(transport.clone(), Arc::new(FixedDelay::immediate(4)));

        let err = client.call_with_retry("submit_job", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::Remote { code: 3, .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_attempts() {
        let transport = ScriptedTransport::new(vec![refused(), Ok(Value::Null)]);
        let client = RpcClient::new(
            transport.clone(),
            Arc::new(FixedDelay::new(Duration::from_secs(15), 4)),
        );

        let started = tokio::time::Instant::now();
        client.call_with_retry("list_jobs", vec![]).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_single_call_does_not_retry() {
        let transport = ScriptedTransport::new(vec![refused(), Ok(Value::Null)]);
        let client = RpcClient::new(transport.clone(), Arc::new(FixedDelay::immediate(4)));

        assert!(client.call("list_jobs", vec![]).await.is_err());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_call_as_decodes() {
        let transport = ScriptedTransport::new(vec![Ok(serde_json::json!([1, 2, 3]))]);
        let client = RpcClient::new(transport, Arc::new(FixedDelay::immediate(1)));

        let ids: Vec<i64> = client.call_as("list_ids", vec![]).await.unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
