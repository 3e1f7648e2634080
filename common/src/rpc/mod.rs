// Remote procedure call plumbing used by the submission and query tools

pub mod client;
pub mod transport;

pub use client::RpcClient;
pub use transport::{HttpRpcTransport, RpcTransport, DEFAULT_RPC_TIMEOUT};
