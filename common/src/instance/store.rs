// File-backed store for instance records
// Records are TOML tables written with owner-only permissions and swapped
// into place with a rename, so readers never see a partial file.

use crate::errors::ConfigStoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Subdirectory of the configuration home that holds instance records
pub const INSTANCES_DIR: &str = "instances";

/// Best-effort permission hardening of the storage directories.
///
/// Failures are reported back to the store, which logs and ignores them.
pub trait StorageHardening: Send + Sync {
    fn restrict_directory(&self, path: &Path) -> std::io::Result<()>;
}

/// Restricts directories to the owning user (mode 0700)
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnerOnlyPermissions;

impl StorageHardening for OwnerOnlyPermissions {
    #[cfg(unix)]
    fn restrict_directory(&self, path: &Path) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))
    }

    #[cfg(not(unix))]
    fn restrict_directory(&self, _path: &Path) -> std::io::Result<()> {
        Ok(())
    }
}

/// Reads and writes configuration records below a configuration home
#[derive(Clone)]
pub struct ConfigStore {
    root: PathBuf,
    hardening: Arc<dyn StorageHardening>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl ConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_hardening(root, Arc::new(OwnerOnlyPermissions))
    }

    pub fn with_hardening(root: impl Into<PathBuf>, hardening: Arc<dyn StorageHardening>) -> Self {
        Self {
            root: root.into(),
            hardening,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.root.join(INSTANCES_DIR)
    }

    /// Create the configuration home and instances directory and restrict
    /// the home to its owner. Never fails; problems are logged.
    pub fn ensure_storage_root(&self) {
        let instances = self.instances_dir();
        if let Err(e) = fs::create_dir_all(&instances) {
            warn!(
                path = %instances.display(),
                error = %e,
                "Failed to create instance directory"
            );
        }
        if let Err(e) = self.hardening.restrict_directory(&self.root) {
            debug!(
                path = %self.root.display(),
                error = %e,
                "Could not restrict configuration directory permissions"
            );
        }
    }

    /// Parse the file at `path` as a key/value table
    pub fn read(&self, path: &Path) -> Result<toml::Table, ConfigStoreError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigStoreError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => {
                return Err(ConfigStoreError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        content
            .parse::<toml::Table>()
            .map_err(|e| ConfigStoreError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Read and deserialize the file at `path`
    pub fn read_as<T: DeserializeOwned>(&self, path: &Path) -> Result<T, ConfigStoreError> {
        let table = self.read(path)?;
        decode_table(path, table)
    }

    /// Serialize `value` to `path`, readable only by the owner, and return
    /// it as re-read from disk
    pub fn write<T>(&self, path: &Path, value: &T) -> Result<T, ConfigStoreError>
    where
        T: Serialize + DeserializeOwned,
    {
        let content =
            toml::to_string(value).map_err(|e| ConfigStoreError::Serialize(e.to_string()))?;

        let tmp_path = temp_path_for(path);
        let io_err = |source: std::io::Error| ConfigStoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Err(e) = write_private(&tmp_path, content.as_bytes()) {
            let _ = fs::remove_file(&tmp_path);
            return Err(io_err(e));
        }
        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(io_err(e));
        }

        debug!(path = %path.display(), bytes = content.len(), "Configuration record written");
        self.read_as(path)
    }

    /// Delete the file at `path`; a missing file is not an error
    pub fn remove(&self, path: &Path) -> Result<(), ConfigStoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ConfigStoreError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

pub(crate) fn decode_table<T: DeserializeOwned>(
    path: &Path,
    table: toml::Table,
) -> Result<T, ConfigStoreError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigStoreError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix: u32 = rand::random();
    path.with_file_name(format!(
        ".{}.{}.{:08x}.tmp",
        file_name,
        std::process::id(),
        suffix
    ))
}

fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;

    // The creation mode is filtered by the umask; pin it explicitly.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
