// Instance registry: per-instance records on disk and their resolution

pub mod record;
pub mod registry;
pub mod store;

pub use record::{
    coerce_port, generate_rpc_path, safe_file_stem, InstanceRecord, InstanceUpdate,
    DEFAULT_BIND_HOST, DEFAULT_PORT,
};
pub use registry::InstanceRegistry;
pub use store::{ConfigStore, OwnerOnlyPermissions, StorageHardening, INSTANCES_DIR};
