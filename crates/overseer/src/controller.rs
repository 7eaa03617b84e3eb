//! Cluster controller collaborators.
//!
//! Worker lists, recovery and status rendering belong to the wider cluster
//! controller. The coordinator only passes these calls through; a
//! standalone implementation answers them from local state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use tessera_common::{ConfigId, TesseraError, WorkerIdentity};

use crate::client_info::ClientSummary;
use crate::failure::AggregatorSnapshot;

/// Everything the coordinator knows locally that a status report may use
#[derive(Debug, Clone)]
pub struct StatusInputs {
    pub node_id: String,
    pub started_at: DateTime<Utc>,
    pub failure: AggregatorSnapshot,
    pub cluster_config_id: ConfigId,
    pub clients: ClientSummary,
}

/// Calls answered by the cluster controller
pub trait ClusterController: Send + Sync {
    /// Workers clients may use for client-side operations
    fn client_workers(&self) -> Vec<WorkerIdentity>;

    /// Request recovery of the given datacenter
    fn force_recovery(&self, dc_id: &str) -> Result<(), TesseraError>;

    /// Render a machine-readable status document
    fn status(&self, inputs: &StatusInputs) -> Result<serde_json::Value, TesseraError>;
}

/// Controller for a coordinator running without a wider cluster
pub struct StandaloneController {
    workers: Vec<WorkerIdentity>,
    recoveries_requested: AtomicU64,
}

#[derive(Serialize)]
struct StatusDocument<'a> {
    node_id: &'a str,
    version: &'static str,
    generated_at: DateTime<Utc>,
    uptime_secs: i64,
    failure_monitoring: FailureSection,
    cluster_config_id: ConfigId,
    clients: &'a ClientSummary,
    client_workers: usize,
    recoveries_requested: u64,
}

#[derive(Serialize)]
struct FailureSection {
    version: u64,
    oldest_answerable_version: u64,
    peers: usize,
    failed: usize,
}

impl StandaloneController {
    pub fn new(workers: Vec<WorkerIdentity>) -> Self {
        Self {
            workers,
            recoveries_requested: AtomicU64::new(0),
        }
    }

    pub fn recoveries_requested(&self) -> u64 {
        self.recoveries_requested.load(Ordering::Relaxed)
    }
}

impl ClusterController for StandaloneController {
    fn client_workers(&self) -> Vec<WorkerIdentity> {
        self.workers.clone()
    }

    fn force_recovery(&self, dc_id: &str) -> Result<(), TesseraError> {
        if dc_id.trim().is_empty() {
            return Err(TesseraError::Recovery("datacenter id must not be empty".to_string()));
        }

        let count = self.recoveries_requested.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(dc_id = %dc_id, requested = count, "🚨 Force recovery requested");
        Ok(())
    }

    fn status(&self, inputs: &StatusInputs) -> Result<serde_json::Value, TesseraError> {
        let now = Utc::now();
        let document = StatusDocument {
            node_id: &inputs.node_id,
            version: env!("CARGO_PKG_VERSION"),
            generated_at: now,
            uptime_secs: (now - inputs.started_at).num_seconds().max(0),
            failure_monitoring: FailureSection {
                version: inputs.failure.version,
                oldest_answerable_version: inputs.failure.oldest_answerable_version,
                peers: inputs.failure.peers.len(),
                failed: inputs.failure.failed_count(),
            },
            cluster_config_id: inputs.cluster_config_id,
            clients: &inputs.clients,
            client_workers: self.workers.len(),
            recoveries_requested: self.recoveries_requested(),
        };

        Ok(serde_json::to_value(document)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn inputs() -> StatusInputs {
        StatusInputs {
            node_id: "overseer-test".to_string(),
            started_at: Utc::now() - Duration::seconds(90),
            failure: AggregatorSnapshot {
                version: 12,
                oldest_answerable_version: 3,
                peers: Vec::new(),
            },
            cluster_config_id: ConfigId::new(0xabc),
            clients: ClientSummary::default(),
        }
    }

    #[test]
    fn test_force_recovery_counts() {
        let controller = StandaloneController::new(Vec::new());
        controller.force_recovery("dc1").unwrap();
        controller.force_recovery("dc2").unwrap();
        assert_eq!(controller.recoveries_requested(), 2);

        let err = controller.force_recovery("  ").unwrap_err();
        assert!(matches!(err, TesseraError::Recovery(_)));
        assert_eq!(controller.recoveries_requested(), 2);
    }

    #[test]
    fn test_status_document() {
        let worker = WorkerIdentity {
            id: "w1".to_string(),
            address: "10.0.0.1:4500".parse().unwrap(),
        };
        let controller = StandaloneController::new(vec![worker.clone()]);
        assert_eq!(controller.client_workers(), vec![worker]);

        let status = controller.status(&inputs()).unwrap();
        assert_eq!(status["node_id"], "overseer-test");
        assert_eq!(status["failure_monitoring"]["version"], 12);
        assert_eq!(status["client_workers"], 1);
        assert!(status["uptime_secs"].as_i64().unwrap() >= 90);
        assert_eq!(status["cluster_config_id"], "00000000000000000000000000000abc");
    }
}
