// Cluster node-state discovery: command execution, output parsing, and the
// per-partition cache

pub mod cache;
pub mod command;
pub mod model;
pub mod parse;

pub use cache::{CacheEntry, Clock, ManualClock, NodeStateCache, SystemClock, DEFAULT_CACHE_TTL};
pub use command::{CommandOutput, CommandRunner, SystemCommandRunner, DEFAULT_NODE_STATUS_COMMAND};
pub use model::{
    NodeInfo, NodeStateSnapshot, PartitionState, StateGroup, NO_PARTITION, SCRATCH_FEATURE,
    UNKNOWN_STATE,
};
pub use parse::{default_parsers, JsonNodeParser, NodeListParser, TextNodeParser};
