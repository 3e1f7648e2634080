// Layered settings: built-in defaults, then {config_home}/config.toml, then
// ZSLURM__SECTION__KEY environment variables

use crate::endpoint::EndpointResolver;
use crate::errors::{ConfigStoreError, RpcError, SettingsError};
use crate::instance::{ConfigStore, InstanceRegistry};
use crate::nodes::NodeStateCache;
use crate::retry::{ExponentialBackoff, FixedDelay, RetryStrategy};
use crate::rpc::{HttpRpcTransport, RpcClient};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Name of the optional settings file inside the config home
pub const SETTINGS_FILE: &str = "config.toml";

/// Overrides the config home directory when set
pub const CONFIG_HOME_ENV: &str = "ZSLURM_HOME";

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub storage: StorageConfig,
    pub rpc: RpcConfig,
    pub node_status: NodeStatusConfig,
    pub observability: ObservabilityConfig,
    /// Runtime view of the selected instance, filled by `with_instance`
    #[serde(skip)]
    pub instance: Option<InstanceRuntime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub config_home: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    /// Fixed pause, or the first pause of an exponential backoff
    pub retry_delay_seconds: u64,
    #[serde(default)]
    pub backoff: BackoffKind,
    /// Cap on a single exponential pause
    pub max_retry_delay_seconds: u64,
}

/// How the pause between RPC attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same pause before every retry
    #[default]
    Fixed,
    /// Pause triples after each failure, with 10% jitter
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatusConfig {
    pub command: String,
    pub cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
}

/// Instance record fields flattened into the settings of one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRuntime {
    pub selected_instance: String,
    pub bind_host: String,
    pub advertise_host: String,
    pub port: u16,
    pub rpc_path: String,
    pub job_name: Option<String>,
}

/// `$ZSLURM_HOME`, else `$HOME/.zslurm`
pub fn default_config_home() -> PathBuf {
    if let Some(home) = std::env::var_os(CONFIG_HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".zslurm")
}

impl Settings {
    /// Load from the default config home and validate
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from_path(default_config_home())
    }

    /// Load using `config_home` as both the storage root and the location of
    /// the optional settings file, then validate
    pub fn load_from_path<P: AsRef<Path>>(config_home: P) -> Result<Self, SettingsError> {
        let config_home = config_home.as_ref();
        let defaults = Settings::default();

        let builder = Config::builder()
            .set_default(
                "storage.config_home",
                config_home.to_string_lossy().into_owned(),
            )?
            .set_default("rpc.timeout_seconds", defaults.rpc.timeout_seconds)?
            .set_default("rpc.max_attempts", defaults.rpc.max_attempts)?
            .set_default("rpc.retry_delay_seconds", defaults.rpc.retry_delay_seconds)?
            .set_default("rpc.backoff", "fixed")?
            .set_default(
                "rpc.max_retry_delay_seconds",
                defaults.rpc.max_retry_delay_seconds,
            )?
            .set_default("node_status.command", defaults.node_status.command)?
            .set_default(
                "node_status.cache_ttl_seconds",
                defaults.node_status.cache_ttl_seconds,
            )?
            .set_default("observability.log_level", defaults.observability.log_level)?
            .set_default("observability.json_logs", defaults.observability.json_logs)?
            .add_source(File::from(config_home.join(SETTINGS_FILE)).required(false))
            .add_source(
                Environment::with_prefix("ZSLURM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        debug!(config_home = %settings.storage.config_home.display(), "Settings loaded");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.storage.config_home.as_os_str().is_empty() {
            return Err(SettingsError::Invalid {
                field: "storage.config_home",
                reason: "cannot be empty".to_string(),
            });
        }
        if self.rpc.timeout_seconds == 0 {
            return Err(SettingsError::Invalid {
                field: "rpc.timeout_seconds",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.rpc.max_attempts == 0 {
            return Err(SettingsError::Invalid {
                field: "rpc.max_attempts",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.rpc.backoff == BackoffKind::Exponential
            && self.rpc.max_retry_delay_seconds < self.rpc.retry_delay_seconds
        {
            return Err(SettingsError::Invalid {
                field: "rpc.max_retry_delay_seconds",
                reason: "must not be below rpc.retry_delay_seconds".to_string(),
            });
        }
        if self.node_status.command.trim().is_empty() {
            return Err(SettingsError::Invalid {
                field: "node_status.command",
                reason: "cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.timeout_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.node_status.cache_ttl_seconds)
    }

    /// Retry policy selected by `rpc.backoff`
    pub fn retry_strategy(&self) -> Arc<dyn RetryStrategy> {
        match self.rpc.backoff {
            BackoffKind::Fixed => Arc::new(FixedDelay::new(
                Duration::from_secs(self.rpc.retry_delay_seconds),
                self.rpc.max_attempts,
            )),
            BackoffKind::Exponential => Arc::new(ExponentialBackoff::with_config(
                self.rpc.retry_delay_seconds,
                self.rpc.max_retry_delay_seconds,
                0.1,
                self.rpc.max_attempts,
            )),
        }
    }

    pub fn registry(&self) -> InstanceRegistry {
        InstanceRegistry::new(ConfigStore::new(self.storage.config_home.clone()))
    }

    pub fn endpoint_resolver(&self) -> EndpointResolver {
        EndpointResolver::new(self.registry())
    }

    pub fn node_state_cache(&self) -> NodeStateCache {
        NodeStateCache::new(self.node_status.command.clone())
    }

    /// HTTP RPC client for `url` using the configured timeout and retry budget
    pub fn rpc_client(&self, url: impl Into<String>) -> Result<RpcClient, RpcError> {
        let transport = HttpRpcTransport::new(url, self.rpc_timeout())?;
        Ok(RpcClient::new(Arc::new(transport), self.retry_strategy()))
    }

    /// Overlay the record of the resolved instance. When nothing resolves the
    /// overlay is cleared; a malformed record is an error.
    pub fn with_instance(
        mut self,
        registry: &InstanceRegistry,
        requested: Option<&str>,
    ) -> Result<Self, ConfigStoreError> {
        self.instance = None;

        let Some(name) = registry.resolve_instance_name(requested) else {
            return Ok(self);
        };
        if let Some(record) = registry.get_instance_config(&name)? {
            self.instance = Some(InstanceRuntime {
                selected_instance: name,
                port: record.manager_port(),
                job_name: record.metadata_str("job_name").map(str::to_string),
                bind_host: record.bind_host,
                advertise_host: record.advertise_host,
                rpc_path: record.rpc_path,
            });
        }
        Ok(self)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                config_home: default_config_home(),
            },
            rpc: RpcConfig {
                timeout_seconds: 70,
                max_attempts: 4,
                retry_delay_seconds: 15,
                backoff: BackoffKind::Fixed,
                max_retry_delay_seconds: 300,
            },
            node_status: NodeStatusConfig {
                command: "scontrol".to_string(),
                cache_ttl_seconds: 60,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: false,
            },
            instance: None,
        }
    }
}
