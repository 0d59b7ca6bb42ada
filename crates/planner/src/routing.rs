//! Routing metadata: servers, logical workers, stage metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One worker server endpoint.
///
/// The dispatch key intentionally excludes the mailbox port: two instances
/// differing only in mailbox port share one query client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerInstance {
    /// Server hostname.
    pub hostname: String,
    /// Port of the query dispatch service.
    pub query_service_port: u16,
    /// Port of the mailbox data-plane service.
    pub query_mailbox_port: u16,
}

impl ServerInstance {
    pub fn new(hostname: impl Into<String>, query_service_port: u16, query_mailbox_port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            query_service_port,
            query_mailbox_port,
        }
    }

    /// Client-pool key for the query dispatch service.
    pub fn dispatch_key(&self) -> String {
        format!("{}_{}", self.hostname, self.query_service_port)
    }
}

impl fmt::Display for ServerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.query_service_port)
    }
}

/// One logical execution slot on a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMetadata {
    /// Worker id, unique within its stage.
    pub worker_id: u32,
    /// Server hosting this worker.
    pub server: ServerInstance,
    /// Stage-local routing properties (mailbox wiring etc.), opaque here.
    pub custom_properties: BTreeMap<String, String>,
}

/// Stage-scoped metadata handed to execution contexts and shipped on the
/// wire next to the serialized fragment root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetadata {
    /// Stage id; 0 is the local reduce stage, remote stages are 1-based.
    pub stage_id: i32,
    /// Workers participating in the stage, in worker-id order.
    pub workers: Vec<WorkerMetadata>,
    /// Opaque stage-level properties.
    pub custom_properties: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::ServerInstance;

    #[test]
    fn dispatch_key_ignores_mailbox_port() {
        let a = ServerInstance::new("host-1", 8442, 8421);
        let b = ServerInstance::new("host-1", 8442, 9421);
        assert_ne!(a, b);
        assert_eq!(a.dispatch_key(), b.dispatch_key());
        assert_eq!(a.dispatch_key(), "host-1_8442");
    }
}
