// Registry of named scheduler instances, one record file per instance

use crate::errors::ConfigStoreError;
use crate::instance::record::{safe_file_stem, InstanceRecord, InstanceUpdate, RECORD_EXTENSION};
use crate::instance::store::{decode_table, ConfigStore};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Enumerates, resolves and edits instance records
#[derive(Debug, Clone)]
pub struct InstanceRegistry {
    store: ConfigStore,
}

impl InstanceRegistry {
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Path of the record file for `name`
    pub fn instance_path(&self, name: &str) -> PathBuf {
        self.store.ensure_storage_root();
        self.store
            .instances_dir()
            .join(format!("{}.{}", safe_file_stem(name), RECORD_EXTENSION))
    }

    /// Names of all instances on disk, sorted. A record that cannot be read
    /// is listed under its file stem.
    pub fn list_instance_names(&self) -> Vec<String> {
        self.store.ensure_storage_root();
        let dir = self.store.instances_dir();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Failed to scan instance directory");
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_record_file(path))
            .filter_map(|path| self.declared_name(&path))
            .collect();

        names.sort();
        names
    }

    fn declared_name(&self, path: &Path) -> Option<String> {
        let stem = path.file_stem()?.to_string_lossy().into_owned();
        match self.store.read(path) {
            Ok(table) => Some(
                table
                    .get("name")
                    .and_then(|v| v.as_str())
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .unwrap_or(stem),
            ),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Unreadable instance record");
                Some(stem)
            }
        }
    }

    /// Resolve a requested instance name to an existing one.
    ///
    /// An exact match wins. Without a request, a sole instance is the
    /// implicit default. Anything else resolves to nothing.
    pub fn resolve_instance_name(&self, requested: Option<&str>) -> Option<String> {
        let names = self.list_instance_names();

        match requested.filter(|r| !r.is_empty()) {
            Some(requested) => names.into_iter().find(|n| n == requested),
            None if names.len() == 1 => names.into_iter().next(),
            None => None,
        }
    }

    /// Load the record for `name`. Missing or empty records are `None`.
    pub fn get_instance_config(
        &self,
        name: &str,
    ) -> Result<Option<InstanceRecord>, ConfigStoreError> {
        if name.is_empty() {
            return Ok(None);
        }
        let path = self.instance_path(name);
        let table = match self.store.read(&path) {
            Ok(table) => table,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        if table.is_empty() {
            return Ok(None);
        }
        decode_table(&path, table).map(Some)
    }

    /// Merge defaults into `partial`, persist it under `name` and return
    /// the stored record
    #[instrument(skip(self, partial))]
    pub fn set_instance_config(
        &self,
        name: &str,
        partial: InstanceUpdate,
    ) -> Result<InstanceRecord, ConfigStoreError> {
        let record = partial.into_record(name);
        let path = self.instance_path(name);
        let stored = self.store.write(&path, &record)?;

        info!(
            instance = name,
            host = %stored.advertise_host,
            base_port = stored.base_port,
            "Instance record saved"
        );
        Ok(stored)
    }

    /// Overwrite the fields in `updates` on the stored record.
    /// Returns `None` without touching disk when there is nothing to apply.
    #[instrument(skip(self, updates))]
    pub fn update_instance_metadata(
        &self,
        name: &str,
        updates: InstanceUpdate,
    ) -> Result<Option<InstanceRecord>, ConfigStoreError> {
        if updates.is_empty() {
            return Ok(None);
        }
        let mut current = self
            .get_instance_config(name)?
            .map(InstanceUpdate::from)
            .unwrap_or_default();
        current.apply(updates);
        self.set_instance_config(name, current).map(Some)
    }

    /// Delete the record for `name`; removing an unknown instance succeeds
    #[instrument(skip(self))]
    pub fn remove_instance(&self, name: &str) -> Result<(), ConfigStoreError> {
        let path = self.instance_path(name);
        self.store.remove(&path)?;
        info!(instance = name, "Instance record removed");
        Ok(())
    }
}

fn is_record_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(true);
    !hidden
        && path.is_file()
        && path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION)
}
