// Instance record model, defaults and file-name sanitization

use lazy_static::lazy_static;
use rand::seq::SliceRandom;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Manager port used when an instance does not override it.
/// The job endpoint listens on the next port up.
pub const DEFAULT_PORT: u16 = 38864;

/// Host an instance binds to when none is configured
pub const DEFAULT_BIND_HOST: &str = "127.0.0.1";

/// Length of the random RPC path token
pub const RPC_PATH_LEN: usize = 8;

/// Extension of instance record files
pub const RECORD_EXTENSION: &str = "toml";

const ASCII_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

lazy_static! {
    static ref UNSAFE_NAME_CHARS: Regex = Regex::new(r"[^A-Za-z0-9_.-]").unwrap();
    static ref HASH_SUFFIX: Regex = Regex::new(r"(^|-)[0-9a-f]{8}$").unwrap();
}

/// One persisted scheduler instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub bind_host: String,

    #[serde(default)]
    pub advertise_host: String,

    #[serde(default = "default_port", deserialize_with = "deserialize_port")]
    pub base_port: u16,

    #[serde(default)]
    pub rpc_path: String,

    /// Operator metadata stored next to the typed fields (e.g. `job_name`)
    #[serde(flatten)]
    pub metadata: BTreeMap<String, toml::Value>,
}

impl InstanceRecord {
    /// Host clients should connect to: advertise host, then bind host, then loopback
    pub fn connect_host(&self) -> &str {
        [self.advertise_host.as_str(), self.bind_host.as_str()]
            .into_iter()
            .find(|h| !h.is_empty())
            .unwrap_or(DEFAULT_BIND_HOST)
    }

    pub fn manager_port(&self) -> u16 {
        self.base_port
    }

    /// Upper port of the instance's reserved pair
    pub fn job_port(&self) -> u32 {
        u32::from(self.base_port) + 1
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Partial instance record merged into the stored one on write.
/// `None` leaves a field to its default (on create) or untouched (on update).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceUpdate {
    pub bind_host: Option<String>,
    pub advertise_host: Option<String>,
    pub base_port: Option<i64>,
    /// `Some("")` clears the token so a fresh one is generated
    pub rpc_path: Option<String>,
    pub metadata: BTreeMap<String, toml::Value>,
}

impl InstanceUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = Some(host.into());
        self
    }

    pub fn advertise_host(mut self, host: impl Into<String>) -> Self {
        self.advertise_host = Some(host.into());
        self
    }

    pub fn base_port(mut self, port: i64) -> Self {
        self.base_port = Some(port);
        self
    }

    pub fn rpc_path(mut self, path: impl Into<String>) -> Self {
        self.rpc_path = Some(path.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bind_host.is_none()
            && self.advertise_host.is_none()
            && self.base_port.is_none()
            && self.rpc_path.is_none()
            && self.metadata.is_empty()
    }

    /// Field-level overwrite: every field set in `other` replaces ours
    pub fn apply(&mut self, other: InstanceUpdate) {
        if other.bind_host.is_some() {
            self.bind_host = other.bind_host;
        }
        if other.advertise_host.is_some() {
            self.advertise_host = other.advertise_host;
        }
        if other.base_port.is_some() {
            self.base_port = other.base_port;
        }
        if other.rpc_path.is_some() {
            self.rpc_path = other.rpc_path;
        }
        self.metadata.extend(other.metadata);
    }

    /// Fill in defaults and produce the record to persist under `name`
    pub fn into_record(self, name: &str) -> InstanceRecord {
        let bind_host = self
            .bind_host
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_HOST.to_string());
        let advertise_host = self
            .advertise_host
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| bind_host.clone());
        let base_port = self.base_port.map(coerce_port).unwrap_or(DEFAULT_PORT);
        let rpc_path = self
            .rpc_path
            .filter(|p| !p.is_empty())
            .unwrap_or_else(generate_rpc_path);

        InstanceRecord {
            name: name.to_string(),
            bind_host,
            advertise_host,
            base_port,
            rpc_path,
            metadata: self.metadata,
        }
    }
}

impl From<InstanceRecord> for InstanceUpdate {
    fn from(record: InstanceRecord) -> Self {
        Self {
            bind_host: Some(record.bind_host),
            advertise_host: Some(record.advertise_host),
            base_port: Some(i64::from(record.base_port)),
            rpc_path: Some(record.rpc_path),
            metadata: record.metadata,
        }
    }
}

/// Ports outside 1..=65534 fall back to the default; both ports of the
/// pair must be valid.
pub fn coerce_port(value: i64) -> u16 {
    match u16::try_from(value) {
        Ok(port) if port > 0 && port < u16::MAX => port,
        _ => DEFAULT_PORT,
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let value = toml::Value::deserialize(deserializer)?;
    let port = match value {
        toml::Value::Integer(i) => coerce_port(i),
        toml::Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(coerce_port)
            .unwrap_or(DEFAULT_PORT),
        toml::Value::Float(f) if f.fract() == 0.0 => coerce_port(f as i64),
        _ => DEFAULT_PORT,
    };
    Ok(port)
}

/// Random token of distinct ASCII letters
pub fn generate_rpc_path() -> String {
    let mut rng = rand::thread_rng();
    ASCII_LETTERS
        .choose_multiple(&mut rng, RPC_PATH_LEN)
        .map(|&b| b as char)
        .collect()
}

fn short_hash(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    hex::encode(digest)[..8].to_string()
}

/// Map an instance name to a filesystem-safe file stem.
///
/// Names made only of `[A-Za-z0-9_.-]` and not starting with a dot are used
/// verbatim. Any other name gets its unsafe characters (and a leading dot)
/// replaced with `_` and a short hash of the original appended, so names
/// that differ only in replaced characters still land in different files.
/// An empty name maps to the hash alone.
///
/// A safe name that already ends in `-` plus eight hex digits, or is eight
/// hex digits, is hashed too. Verbatim stems never have that shape, so they
/// cannot coincide with the stem of a hashed name.
pub fn safe_file_stem(name: &str) -> String {
    if name.is_empty() {
        return short_hash(name);
    }
    let mut stem = UNSAFE_NAME_CHARS.replace_all(name, "_").into_owned();
    if stem.starts_with('.') {
        stem.replace_range(..1, "_");
    }
    if stem == name && !HASH_SUFFIX.is_match(name) {
        stem
    } else {
        format!("{}-{}", stem, short_hash(name))
    }
}
