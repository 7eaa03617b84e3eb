//! Request and reply bodies of the coordinator's control-plane calls.

use serde::{Deserialize, Serialize};

use crate::client_version::ClientBuildIdentity;
use crate::types::{ConfigId, FailureStatus, PeerIdentity, SystemFailureStatus};

/// Heartbeat sent by every participant, `client_request_interval_ms`
/// after it received the previous reply.
///
/// Failing to send one in time implies a failed status. A request without
/// `sender_status` only observes: the sender learns the failure information
/// without being monitored itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureMonitoringRequest {
    /// Self-diagnosed status of the sender, if it wants to be monitored
    #[serde(default)]
    pub sender_status: Option<FailureStatus>,

    /// Version returned by the previous reply (0 when there was none)
    #[serde(default)]
    pub failure_information_version: u64,

    /// Identity of the sender
    pub addresses: PeerIdentity,
}

impl FailureMonitoringRequest {
    /// A monitored participant's heartbeat
    pub fn report(addresses: PeerIdentity, status: FailureStatus, since: u64) -> Self {
        Self {
            sender_status: Some(status),
            failure_information_version: since,
            addresses,
        }
    }

    /// An observer's query
    pub fn observe(addresses: PeerIdentity, since: u64) -> Self {
        Self {
            sender_status: None,
            failure_information_version: since,
            addresses,
        }
    }
}

/// Reply to a [`FailureMonitoringRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureMonitoringReply {
    /// Statuses that changed since the requested version
    pub changes: Vec<SystemFailureStatus>,

    /// Version the changes bring the caller up to
    pub failure_information_version: u64,

    /// If true, changes are relative to every peer being failed rather
    /// than to the version given in the request
    pub all_others_failed: bool,

    /// Send the next heartbeat after this many milliseconds
    pub client_request_interval_ms: u64,

    /// After this many milliseconds without a reply, consider the
    /// coordinator itself failed
    pub consider_server_failed_timeout_ms: u64,
}

/// Long-poll for the cluster configuration.
///
/// Returns immediately when the current configuration id differs from
/// `known_client_info_id`; otherwise returns when it next changes (or after
/// a long interval, unchanged).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDatabaseRequest {
    /// Configuration id the client already holds
    #[serde(default)]
    pub known_client_info_id: ConfigId,

    /// Builds the client is able to run
    #[serde(default)]
    pub supported_versions: Vec<ClientBuildIdentity>,

    /// Problems the client wants surfaced in status
    #[serde(default)]
    pub issues: Vec<String>,

    /// Grouping label for the client's trace logs
    #[serde(default)]
    pub trace_log_group: String,

    #[serde(default)]
    pub client_tls_configured: bool,
}

/// Ask the external recovery workflow to force a recovery in a datacenter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceRecoveryRequest {
    pub dc_id: String,
}

/// Plain acknowledgement reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub const OK: Ack = Ack { ok: true };
}
