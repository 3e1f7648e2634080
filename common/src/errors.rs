// Error types shared by the instance registry, endpoint resolution, RPC
// client and node-state discovery

use std::path::PathBuf;
use thiserror::Error;

/// Instance record persistence errors
#[derive(Error, Debug)]
pub enum ConfigStoreError {
    #[error("Configuration file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Malformed configuration file {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize record: {0}")]
    Serialize(String),
}

impl ConfigStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigStoreError::NotFound { .. })
    }
}

/// Endpoint resolution errors
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("Instance '{0}' not found")]
    InstanceNotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigStoreError),
}

/// Remote procedure call errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Remote fault {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Could not connect to manager at {url} after {attempts} attempts: {last_error}")]
    Unreachable {
        url: String,
        attempts: u32,
        last_error: String,
    },
}

impl RpcError {
    /// Connection-level failures are worth another attempt; everything the
    /// remote side actually answered is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            RpcError::Transport(err.to_string())
        } else if err.is_decode() {
            RpcError::Protocol(format!("Failed to decode response: {}", err))
        } else {
            RpcError::Transport(err.to_string())
        }
    }
}

/// Node-status command errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeStatusError {
    #[error("Node-status command failed: {0}")]
    SubprocessFailure(String),

    #[error("Output is not in this format")]
    NotThisFormat,

    #[error("Invalid node-status output: {0}")]
    Invalid(String),
}

/// Settings loading and validation errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Request validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },
}

/// Job client errors
#[derive(Error, Debug)]
pub enum JobClientError {
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Unexpected response for {method}: {reason}")]
    UnexpectedResponse { method: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_names_the_url() {
        let err = RpcError::Unreachable {
            url: "http://10.0.0.5:40001/abcdefgh".to_string(),
            attempts: 4,
            last_error: "connection refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("http://10.0.0.5:40001/abcdefgh"));
        assert!(msg.contains("4 attempts"));
    }

    #[test]
    fn test_only_transport_errors_are_retryable() {
        assert!(RpcError::Transport("reset".to_string()).is_retryable());
        assert!(!RpcError::Remote {
            code: 1,
            message: "no such job".to_string()
        }
        .is_retryable());
        assert!(!RpcError::Protocol("bad envelope".to_string()).is_retryable());
    }

    #[test]
    fn test_instance_not_found_message() {
        let err = EndpointError::InstanceNotFound("prod".to_string());
        assert_eq!(err.to_string(), "Instance 'prod' not found");
    }

    #[test]
    fn test_config_store_not_found_predicate() {
        let err = ConfigStoreError::NotFound {
            path: PathBuf::from("/tmp/missing.toml"),
        };
        assert!(err.is_not_found());
        assert!(err.to_string().contains("/tmp/missing.toml"));
    }
}
