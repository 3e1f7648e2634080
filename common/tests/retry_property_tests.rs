// Property-based tests for retry policies and the retrying RPC client

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use zslurm_common::errors::RpcError;
use zslurm_common::retry::{ExponentialBackoff, FixedDelay, RetryStrategy};
use zslurm_common::rpc::{RpcClient, RpcTransport};

/// Fails with a transport error `failures` times, then answers
struct FlakyTransport {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl RpcTransport for FlakyTransport {
    fn url(&self) -> &str {
        "http://127.0.0.1:38865/abcdefgh"
    }

    async fn call(&self, _method: &str, _params: Vec<Value>) -> Result<Value, RpcError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(RpcError::Transport("connection refused".to_string()))
        } else {
            Ok(json!("ok"))
        }
    }
}

/// *For any* attempt budget, a fixed-delay policy allows exactly that many
/// attempts and then stops.
#[test]
fn property_fixed_delay_budget() {
    proptest!(|(
        max_attempts in 1u32..10,
        delay_secs in 0u64..60,
        failed in 1u32..20
    )| {
        let strategy = FixedDelay::new(Duration::from_secs(delay_secs), max_attempts);
        let next = strategy.next_delay(failed);

        if failed < max_attempts {
            prop_assert_eq!(next, Some(Duration::from_secs(delay_secs)));
        } else {
            prop_assert!(next.is_none(), "no delay after {} failures", failed);
        }
    });
}

/// *For any* failure count N, the exponential delay is base * 3^(N-1) capped
/// at the maximum, plus at most the jitter fraction of it.
#[test]
fn property_exponential_backoff_with_jitter() {
    proptest!(|(
        failed in 1u32..8,
        base_delay in 1u64..60,
        max_delay in 60u64..7200,
        jitter_factor in 0.0f64..1.0
    )| {
        let strategy = ExponentialBackoff::with_config(base_delay, max_delay, jitter_factor, 8);
        let delay = strategy.next_delay(failed).unwrap();

        let expected_ms = (base_delay * 3_u64.pow(failed - 1)).min(max_delay) * 1000;
        let max_jitter_ms = (expected_ms as f64 * jitter_factor) as u64;
        let actual_ms = delay.as_millis() as u64;

        prop_assert!(actual_ms >= expected_ms);
        prop_assert!(actual_ms <= expected_ms + max_jitter_ms);
    });
}

/// *For any* attempt budget and number of leading transport failures, the
/// client succeeds if an attempt within the budget succeeds and otherwise
/// reports the endpoint unreachable after spending the whole budget.
#[test]
fn property_client_spends_exactly_the_budget() {
    proptest!(|(max_attempts in 1u32..6, failures in 0u32..8)| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let transport = Arc::new(FlakyTransport { failures, calls: AtomicU32::new(0) });
        let client = RpcClient::new(transport.clone(), Arc::new(FixedDelay::immediate(max_attempts)));

        let result = runtime.block_on(client.call_with_retry("list_jobs", Vec::new()));
        let calls = transport.calls.load(Ordering::SeqCst);

        if failures < max_attempts {
            prop_assert_eq!(result, Ok(json!("ok")));
            prop_assert_eq!(calls, failures + 1);
        } else {
            prop_assert_eq!(calls, max_attempts);
            match result {
                Err(RpcError::Unreachable { url, attempts, .. }) => {
                    prop_assert_eq!(url, "http://127.0.0.1:38865/abcdefgh");
                    prop_assert_eq!(attempts, max_attempts);
                }
                other => prop_assert!(false, "unexpected result {:?}", other),
            }
        }
    });
}
