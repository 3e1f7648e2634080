// RPC endpoint addresses derived from instance records
//
// Every instance reserves two consecutive ports: the base port serves
// management calls and base port + 1 serves job submission and queries.

use crate::errors::EndpointError;
use crate::instance::{InstanceRecord, InstanceRegistry};
use tracing::debug;

/// Which of the instance's two endpoints to address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Manager,
    Job,
}

impl EndpointKind {
    pub fn port_offset(self) -> u32 {
        match self {
            EndpointKind::Manager => 0,
            EndpointKind::Job => 1,
        }
    }
}

/// Both endpoint URLs of one resolved instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub instance: String,
    pub manager_url: String,
    pub job_url: String,
}

/// `http://{host}:{port}/{rpc_path}` for the given endpoint of `record`
pub fn endpoint_url(record: &InstanceRecord, kind: EndpointKind, override_host: Option<&str>) -> String {
    let host = override_host
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| record.connect_host());
    let port = u32::from(record.base_port) + kind.port_offset();
    format!("http://{}:{}/{}", host, port, record.rpc_path)
}

#[derive(Debug, Clone)]
pub struct EndpointResolver {
    registry: InstanceRegistry,
}

impl EndpointResolver {
    pub fn new(registry: InstanceRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Resolve `requested` and load its record
    pub fn resolve_record(&self, requested: Option<&str>) -> Result<InstanceRecord, EndpointError> {
        let not_found = || EndpointError::InstanceNotFound(requested.unwrap_or("<default>").to_string());

        let name = self
            .registry
            .resolve_instance_name(requested)
            .ok_or_else(not_found)?;
        self.registry
            .get_instance_config(&name)?
            .ok_or_else(not_found)
    }

    pub fn url(
        &self,
        kind: EndpointKind,
        requested: Option<&str>,
        override_host: Option<&str>,
    ) -> Result<String, EndpointError> {
        let record = self.resolve_record(requested)?;
        let url = endpoint_url(&record, kind, override_host);
        debug!(instance = %record.name, ?kind, url = %url, "Resolved endpoint");
        Ok(url)
    }

    pub fn manager_url(
        &self,
        requested: Option<&str>,
        override_host: Option<&str>,
    ) -> Result<String, EndpointError> {
        self.url(EndpointKind::Manager, requested, override_host)
    }

    pub fn job_url(
        &self,
        requested: Option<&str>,
        override_host: Option<&str>,
    ) -> Result<String, EndpointError> {
        self.url(EndpointKind::Job, requested, override_host)
    }

    /// Resolve once and build both URLs from the same record
    pub fn endpoints(
        &self,
        requested: Option<&str>,
        override_host: Option<&str>,
    ) -> Result<Endpoints, EndpointError> {
        let record = self.resolve_record(requested)?;
        Ok(Endpoints {
            manager_url: endpoint_url(&record, EndpointKind::Manager, override_host),
            job_url: endpoint_url(&record, EndpointKind::Job, override_host),
            instance: record.name,
        })
    }
}
