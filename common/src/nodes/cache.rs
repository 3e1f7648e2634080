// Time-bounded cache of the cluster's partition state
//
// The cache entry lives behind an async mutex that is held for the whole
// refresh, so concurrent readers of a stale entry wait for one subprocess
// run instead of starting their own.

use crate::errors::NodeStatusError;
use crate::nodes::command::{CommandRunner, SystemCommandRunner, DEFAULT_NODE_STATUS_COMMAND};
use crate::nodes::model::{NodeInfo, NodeStateSnapshot};
use crate::nodes::parse::{default_parsers, NodeListParser};
use crate::telemetry;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Age up to which a cached snapshot is served without a refresh
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Source of the current time for cache expiry
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A snapshot and the moment it was captured
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub snapshot: Arc<NodeStateSnapshot>,
    pub captured_at: Instant,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.captured_at) < ttl
    }
}

/// Discovers node state through the node-status command and caches the
/// per-partition aggregate
pub struct NodeStateCache {
    program: String,
    runner: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
    parsers: Vec<Box<dyn NodeListParser>>,
    entry: tokio::sync::Mutex<Option<CacheEntry>>,
}

impl std::fmt::Debug for NodeStateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStateCache")
            .field("program", &self.program)
            .field(
                "parsers",
                &self.parsers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Default for NodeStateCache {
    fn default() -> Self {
        Self::new(DEFAULT_NODE_STATUS_COMMAND)
    }
}

impl NodeStateCache {
    /// Cache running `program` as a real subprocess
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_runner(program, Arc::new(SystemCommandRunner), Arc::new(SystemClock))
    }

    pub fn with_runner(
        program: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            program: program.into(),
            runner,
            clock,
            parsers: default_parsers(),
            entry: tokio::sync::Mutex::new(None),
        }
    }

    /// Replace the parser strategies; they are tried in order
    pub fn with_parsers(mut self, parsers: Vec<Box<dyn NodeListParser>>) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Partition state no older than `ttl`, refreshing when the cached one is
    /// older. Never fails: when no strategy yields a node list the snapshot
    /// is empty.
    pub async fn get_partition_state(&self, ttl: Duration) -> Arc<NodeStateSnapshot> {
        let mut entry = self.entry.lock().await;
        let now = self.clock.now();

        if let Some(cached) = entry.as_ref() {
            if cached.is_fresh(now, ttl) {
                telemetry::record_node_status_cache_hit();
                return cached.snapshot.clone();
            }
        }

        // Age counts from before the command runs
        let snapshot = Arc::new(NodeStateSnapshot::from_nodes(&self.fetch_nodes().await));
        *entry = Some(CacheEntry {
            snapshot: snapshot.clone(),
            captured_at: now,
        });
        snapshot
    }

    /// Refresh unconditionally
    pub async fn refresh(&self) -> Arc<NodeStateSnapshot> {
        self.get_partition_state(Duration::ZERO).await
    }

    /// Drop the cached entry so the next read refreshes
    pub async fn invalidate(&self) {
        *self.entry.lock().await = None;
    }

    /// The cached entry, if any, regardless of age
    pub async fn cached_entry(&self) -> Option<CacheEntry> {
        self.entry.lock().await.clone()
    }

    /// Run the strategies in order and return the first node list produced.
    /// Bypasses the cache.
    #[instrument(skip(self), fields(program = %self.program))]
    pub async fn fetch_nodes(&self) -> Vec<NodeInfo> {
        for parser in &self.parsers {
            match self.try_parser(parser.as_ref()).await {
                Ok(nodes) => {
                    info!(
                        strategy = parser.name(),
                        nodes = nodes.len(),
                        "Node state refreshed"
                    );
                    telemetry::record_node_status_refresh(parser.name());
                    return nodes;
                }
                Err(NodeStatusError::NotThisFormat) => {
                    debug!(strategy = parser.name(), "Output not in this format, trying next");
                }
                Err(e) => {
                    warn!(strategy = parser.name(), error = %e, "Node-status strategy failed");
                }
            }
        }

        warn!("No node-status strategy succeeded; reporting an empty node list");
        telemetry::record_node_status_refresh("none");
        telemetry::record_node_status_degraded();
        Vec::new()
    }

    async fn try_parser(&self, parser: &dyn NodeListParser) -> Result<Vec<NodeInfo>, NodeStatusError> {
        let output = self.runner.run(&self.program, parser.args()).await?;
        if !output.success {
            return Err(NodeStatusError::SubprocessFailure(format!(
                "{} {} exited unsuccessfully: {}",
                self.program,
                parser.args().join(" "),
                output.stderr.trim()
            )));
        }
        parser.parse(&output.stdout)
    }
}
