// Shared library for the zslurm tools: instance registry, endpoint
// resolution, RPC client, job client and cluster node-state discovery

pub mod config;
pub mod endpoint;
pub mod errors;
pub mod format;
pub mod instance;
pub mod jobs;
pub mod nodes;
pub mod retry;
pub mod rpc;
pub mod telemetry;

pub use config::Settings;
pub use endpoint::{EndpointKind, EndpointResolver, Endpoints};
pub use instance::{InstanceRecord, InstanceRegistry, InstanceUpdate};
pub use jobs::{JobClient, JobId, JobSubmission, JobSummary};
pub use nodes::{NodeStateCache, NodeStateSnapshot};
pub use rpc::RpcClient;
