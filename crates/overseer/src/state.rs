//! Application state and shared resources.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tessera_common::ClusterConfigBlob;

use crate::client_info::ClientInfoDistributor;
use crate::config::AppConfig;
use crate::controller::{ClusterController, StandaloneController, StatusInputs};
use crate::failure::FailureAggregator;
use crate::gate::VersionGate;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Node identifier reported in status
    pub node_id: String,

    /// Failure table shared with the UDP heartbeat service
    pub aggregator: Arc<FailureAggregator>,

    /// Cluster configuration long-poll distributor
    pub distributor: Arc<ClientInfoDistributor>,

    /// Protocol gate for client calls
    pub gate: VersionGate,

    /// Pass-through collaborator for workers, recovery and status
    pub controller: Arc<dyn ClusterController>,

    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build state from configuration, loading the initial cluster config
    pub fn new(config: AppConfig) -> Result<Self> {
        let payload = config.initial_cluster_config()?;
        let controller = Arc::new(StandaloneController::new(config.client_workers.clone()));
        Ok(Self::with_controller(config, ClusterConfigBlob::new(payload), controller))
    }

    pub fn with_controller(
        config: AppConfig,
        initial: ClusterConfigBlob,
        controller: Arc<dyn ClusterController>,
    ) -> Self {
        let aggregator = Arc::new(FailureAggregator::new(
            config.failure.clone(),
            initial_failure_version(),
        ));
        let distributor = Arc::new(ClientInfoDistributor::new(
            initial,
            config.distributor.long_poll_ceiling(),
        ));
        let gate = VersionGate::new(config.minimum_protocol_version);
        let node_id = config.node_id.clone();

        Self {
            config,
            node_id,
            aggregator,
            distributor,
            gate,
            controller,
            started_at: Utc::now(),
        }
    }

    /// Gather the local facts a status report is built from
    pub fn status_inputs(&self) -> StatusInputs {
        StatusInputs {
            node_id: self.node_id.clone(),
            started_at: self.started_at,
            failure: self.aggregator.snapshot(),
            cluster_config_id: self.distributor.current().id,
            clients: self.distributor.clients(),
        }
    }
}

/// Failure versions start at the wall clock in microseconds, so a restarted
/// coordinator never answers a version handed out by its predecessor.
fn initial_failure_version() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(1)
        .max(1)
}
