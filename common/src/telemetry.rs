// Structured logging setup and metric recording helpers
//
// The library only records metrics through the `metrics` facade; the
// embedding binary decides whether an exporter is installed.

use anyhow::Result;
use metrics::{counter, describe_counter};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `log_level`. With `json` set, events are
/// emitted as one JSON object per line including span context; otherwise a
/// compact human-readable format is used.
pub fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let layer = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::debug!(log_level, json, "Logging initialized");
    Ok(())
}

/// Register descriptions for every metric this crate records
pub fn describe_metrics() {
    describe_counter!("rpc_attempts_total", "RPC attempts made, retries included");
    describe_counter!("rpc_retries_total", "RPC attempts repeated after a transport failure");
    describe_counter!(
        "rpc_unreachable_total",
        "RPC calls abandoned after the retry budget was spent"
    );
    describe_counter!(
        "node_status_refresh_total",
        "Node-status command refreshes of the partition state cache"
    );
    describe_counter!(
        "node_status_cache_hits_total",
        "Partition state reads served from the cache"
    );
    describe_counter!(
        "node_status_degraded_total",
        "Refreshes where no node-status strategy produced a node list"
    );
}

#[inline]
pub fn record_rpc_attempt(method: &str) {
    counter!("rpc_attempts_total", "method" => method.to_string()).increment(1);
}

#[inline]
pub fn record_rpc_retry(method: &str) {
    counter!("rpc_retries_total", "method" => method.to_string()).increment(1);
}

#[inline]
pub fn record_rpc_unreachable(method: &str) {
    counter!("rpc_unreachable_total", "method" => method.to_string()).increment(1);
}

/// `strategy` is the parser that produced the node list, or "none"
#[inline]
pub fn record_node_status_refresh(strategy: &'static str) {
    counter!("node_status_refresh_total", "strategy" => strategy).increment(1);
}

#[inline]
pub fn record_node_status_cache_hit() {
    counter!("node_status_cache_hits_total").increment(1);
}

#[inline]
pub fn record_node_status_degraded() {
    counter!("node_status_degraded_total").increment(1);
}
