//! Configuration management for Overseer.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use tessera_common::constants::{
    DEFAULT_HEARTBEAT_ADDR, DEFAULT_LISTEN_ADDR, FAILURE_HISTORY_LIMIT, HEARTBEAT_INTERVAL_MS,
    LONG_POLL_CEILING_SECS, MAX_HEARTBEAT_INTERVAL_MS, OBSERVER_INTERVAL_MS, PEER_TIMEOUT_MS,
    SERVER_FAILED_TIMEOUT_MS, SWEEP_INTERVAL_MS, TARGET_HEARTBEATS_PER_SEC,
};
use tessera_common::{ProtocolVersion, WorkerIdentity};

/// Upper bound on every failure-monitoring duration knob (one day)
const MAX_FAILURE_DURATION_MS: u64 = 86_400_000;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP listen address (client calls, admin)
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// UDP address for participant heartbeats
    #[serde(default = "default_heartbeat_addr")]
    pub heartbeat_addr: String,

    /// This coordinator's unique ID (auto-generated if not set)
    #[serde(default = "generate_node_id")]
    pub node_id: String,

    /// Oldest wire protocol accepted from senders
    #[serde(default = "default_minimum_protocol")]
    pub minimum_protocol_version: ProtocolVersion,

    /// File holding the initial cluster configuration payload
    #[serde(default)]
    pub cluster_config_path: Option<String>,

    /// Workers reported by `GetClientWorkerList`
    #[serde(default)]
    pub client_workers: Vec<WorkerIdentity>,

    /// Request timeout for non-long-poll HTTP routes (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Failure monitoring configuration
    #[serde(default)]
    pub failure: FailureConfig,

    /// Client info distribution configuration
    #[serde(default)]
    pub distributor: DistributorConfig,
}

/// Failure monitoring knobs (all durations in milliseconds)
#[derive(Debug, Clone, Deserialize)]
pub struct FailureConfig {
    /// Shortest interval handed to monitored participants
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Longest interval the self-tuning may hand out
    #[serde(default = "default_max_heartbeat_interval")]
    pub max_heartbeat_interval_ms: u64,

    /// Interval handed to observers that are not monitored
    #[serde(default = "default_observer_interval")]
    pub observer_interval_ms: u64,

    /// Heartbeat rate the interval is tuned towards
    #[serde(default = "default_target_rate")]
    pub target_heartbeats_per_sec: u64,

    /// Grace beyond the told interval before a silent peer is failed
    #[serde(default = "default_peer_timeout")]
    pub peer_timeout_ms: u64,

    /// Grace beyond the told interval before a participant gives up on us
    #[serde(default = "default_server_failed_timeout")]
    pub server_failed_timeout_ms: u64,

    /// Background sweep period
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Table changes kept for delta replies
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval(),
            max_heartbeat_interval_ms: default_max_heartbeat_interval(),
            observer_interval_ms: default_observer_interval(),
            target_heartbeats_per_sec: default_target_rate(),
            peer_timeout_ms: default_peer_timeout(),
            server_failed_timeout_ms: default_server_failed_timeout(),
            sweep_interval_ms: default_sweep_interval(),
            history_limit: default_history_limit(),
        }
    }
}

impl FailureConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Client info distribution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DistributorConfig {
    /// Longest time an unchanged long-poll is held before answering as-is
    #[serde(default = "default_long_poll_ceiling")]
    pub long_poll_ceiling_secs: u64,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            long_poll_ceiling_secs: default_long_poll_ceiling(),
        }
    }
}

impl DistributorConfig {
    pub fn long_poll_ceiling(&self) -> Duration {
        Duration::from_secs(self.long_poll_ceiling_secs)
    }
}

// Default value functions
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_heartbeat_addr() -> String { DEFAULT_HEARTBEAT_ADDR.to_string() }
fn default_minimum_protocol() -> ProtocolVersion { ProtocolVersion::MIN_COMPATIBLE }
fn default_request_timeout() -> u64 { 10 }
fn default_heartbeat_interval() -> u64 { HEARTBEAT_INTERVAL_MS }
fn default_max_heartbeat_interval() -> u64 { MAX_HEARTBEAT_INTERVAL_MS }
fn default_observer_interval() -> u64 { OBSERVER_INTERVAL_MS }
fn default_target_rate() -> u64 { TARGET_HEARTBEATS_PER_SEC }
fn default_peer_timeout() -> u64 { PEER_TIMEOUT_MS }
fn default_server_failed_timeout() -> u64 { SERVER_FAILED_TIMEOUT_MS }
fn default_sweep_interval() -> u64 { SWEEP_INTERVAL_MS }
fn default_history_limit() -> usize { FAILURE_HISTORY_LIMIT }
fn default_long_poll_ceiling() -> u64 { LONG_POLL_CEILING_SECS } // 2 minutes

fn generate_node_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    format!("overseer-{:08x}", rng.random::<u32>())
}

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &crate::ServeArgs) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .add_source(config::Environment::with_prefix("OVERSEER").separator("__"))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(ref heartbeat_bind) = args.heartbeat_bind {
            config.heartbeat_addr = heartbeat_bind.clone();
        }
        if let Some(ref path) = args.cluster_config {
            config.cluster_config_path = Some(path.clone());
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject knob combinations the protocol cannot honour
    pub fn validate(&self) -> Result<()> {
        let failure = &self.failure;
        if failure.heartbeat_interval_ms == 0 {
            anyhow::bail!("failure.heartbeat_interval_ms must be positive");
        }
        if failure.max_heartbeat_interval_ms < failure.heartbeat_interval_ms {
            anyhow::bail!("failure.max_heartbeat_interval_ms is below heartbeat_interval_ms");
        }
        if failure.server_failed_timeout_ms == 0 {
            anyhow::bail!("failure.server_failed_timeout_ms must be positive");
        }
        if failure.sweep_interval_ms == 0 {
            anyhow::bail!("failure.sweep_interval_ms must be positive");
        }
        if failure.history_limit == 0 {
            anyhow::bail!("failure.history_limit must be positive");
        }

        let durations = [
            ("max_heartbeat_interval_ms", failure.max_heartbeat_interval_ms),
            ("observer_interval_ms", failure.observer_interval_ms),
            ("peer_timeout_ms", failure.peer_timeout_ms),
            ("server_failed_timeout_ms", failure.server_failed_timeout_ms),
            ("sweep_interval_ms", failure.sweep_interval_ms),
        ];
        for (name, value) in durations {
            if value > MAX_FAILURE_DURATION_MS {
                anyhow::bail!("failure.{} must be at most {} ms", name, MAX_FAILURE_DURATION_MS);
            }
        }
        Ok(())
    }

    /// Read the initial cluster configuration payload, if one is configured
    pub fn initial_cluster_config(&self) -> Result<Vec<u8>> {
        match self.cluster_config_path {
            Some(ref path) => std::fs::read(path)
                .with_context(|| format!("Failed to read cluster config {}", path)),
            None => Ok(Vec::new()),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            heartbeat_addr: default_heartbeat_addr(),
            node_id: generate_node_id(),
            minimum_protocol_version: default_minimum_protocol(),
            cluster_config_path: None,
            client_workers: Vec::new(),
            request_timeout_secs: default_request_timeout(),
            failure: FailureConfig::default(),
            distributor: DistributorConfig::default(),
        }
    }
}
