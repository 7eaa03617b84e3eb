//! Failure Sync Loop (participant side)
//!
//! Each participant keeps one logical session with the aggregator:
//! send a heartbeat, wait for the reply, merge the delta into the local
//! failure view, sleep for the interval the aggregator asked for, repeat.
//! Transport trouble never escapes the loop; the worst a participant sees
//! is a stale view while it backs off and retries.

use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use tessera_common::{
    FailureMonitoringReply, FailureMonitoringRequest, FailureStatus, PeerIdentity, TesseraError,
};

/// One heartbeat round trip to the aggregator
pub trait HeartbeatLink: Send + Sync + 'static {
    fn heartbeat(
        &self,
        request: FailureMonitoringRequest,
    ) -> impl Future<Output = Result<FailureMonitoringReply, TesseraError>> + Send;
}

/// A participant's local belief about who is alive
#[derive(Debug, Clone, Default)]
pub struct FailureView {
    statuses: HashMap<PeerIdentity, FailureStatus>,
    since_version: u64,
    coordinator_reachable: bool,
}

impl FailureView {
    /// Merge a reply into the view.
    ///
    /// Returns the peers whose failed/available state flipped.
    pub fn apply(&mut self, reply: &FailureMonitoringReply) -> Vec<PeerIdentity> {
        let previous: HashMap<PeerIdentity, bool> = self
            .statuses
            .iter()
            .map(|(peer, status)| (peer.clone(), status.failed))
            .collect();

        if reply.all_others_failed {
            for status in self.statuses.values_mut() {
                *status = FailureStatus::failed();
            }
        }
        for change in &reply.changes {
            self.statuses.insert(change.addresses.clone(), change.status);
        }
        self.since_version = reply.failure_information_version;
        self.coordinator_reachable = true;

        let mut flipped: Vec<PeerIdentity> = self
            .statuses
            .iter()
            .filter(|(peer, status)| {
                // Peers we have never heard of count as failed
                previous.get(*peer).copied().unwrap_or(true) != status.failed
            })
            .map(|(peer, _)| peer.clone())
            .collect();
        flipped.sort();
        flipped
    }

    /// Status of a peer; unknown peers are failed
    pub fn status(&self, peer: &PeerIdentity) -> FailureStatus {
        self.statuses.get(peer).copied().unwrap_or_default()
    }

    pub fn is_failed(&self, peer: &PeerIdentity) -> bool {
        self.status(peer).is_failed()
    }

    /// Version to present in the next heartbeat
    pub fn since_version(&self) -> u64 {
        self.since_version
    }

    /// Whether the last round trip to the aggregator succeeded
    pub fn coordinator_reachable(&self) -> bool {
        self.coordinator_reachable
    }

    pub fn available_peers(&self) -> Vec<PeerIdentity> {
        let mut peers: Vec<_> = self
            .statuses
            .iter()
            .filter(|(_, s)| s.is_available())
            .map(|(p, _)| p.clone())
            .collect();
        peers.sort();
        peers
    }

    pub fn known_peers(&self) -> usize {
        self.statuses.len()
    }
}

/// Sync loop configuration
#[derive(Clone, Debug)]
pub struct SyncLoopConfig {
    /// Our identity as seen by the aggregator
    pub identity: PeerIdentity,
    /// Round-trip timeout before the first reply tells us the real one
    pub initial_timeout: Duration,
    /// First retry delay after a failed round trip
    pub initial_backoff: Duration,
    /// Retry delay ceiling
    pub max_backoff: Duration,
}

impl SyncLoopConfig {
    pub fn new(identity: PeerIdentity) -> Self {
        Self {
            identity,
            initial_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Exponential backoff with jitter
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        base.mul_f64(rand::rng().random_range(0.5..=1.0))
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// The participant's heartbeat session
pub struct SyncLoop<L> {
    link: L,
    config: SyncLoopConfig,
    /// Our own status; `None` means observe without being monitored
    self_status: Option<watch::Receiver<FailureStatus>>,
    view: watch::Sender<FailureView>,
    round_trip_timeout: Duration,
    backoff: Backoff,
    /// The current outage has already been logged
    outage_reported: bool,
}

impl<L: HeartbeatLink> SyncLoop<L> {
    /// A participant that is monitored and reports the status fed through `self_status`
    pub fn monitored(
        link: L,
        config: SyncLoopConfig,
        self_status: watch::Receiver<FailureStatus>,
    ) -> Self {
        Self::build(link, config, Some(self_status))
    }

    /// A participant that only wants to learn the failure information
    pub fn observer(link: L, config: SyncLoopConfig) -> Self {
        Self::build(link, config, None)
    }

    fn build(
        link: L,
        config: SyncLoopConfig,
        self_status: Option<watch::Receiver<FailureStatus>>,
    ) -> Self {
        let (view, _) = watch::channel(FailureView::default());
        let backoff = Backoff::new(config.initial_backoff, config.max_backoff);
        Self {
            link,
            round_trip_timeout: config.initial_timeout,
            config,
            self_status,
            view,
            backoff,
            outage_reported: false,
        }
    }

    /// Watch the failure view; a new value is published after every reply
    pub fn subscribe(&self) -> watch::Receiver<FailureView> {
        self.view.subscribe()
    }

    /// Copy of the current view
    pub fn view(&self) -> FailureView {
        self.view.borrow().clone()
    }

    fn next_request(&self) -> FailureMonitoringRequest {
        let since = self.view.borrow().since_version();
        let identity = self.config.identity.clone();
        match self.self_status {
            Some(ref status) => FailureMonitoringRequest::report(identity, *status.borrow(), since),
            None => FailureMonitoringRequest::observe(identity, since),
        }
    }

    /// Run one round trip and merge the reply.
    ///
    /// Returns how long to wait before the next round.
    pub async fn step(&mut self) -> Duration {
        let request = self.next_request();

        let round_trip = self.link.heartbeat(request);
        let outcome = match tokio::time::timeout(self.round_trip_timeout, round_trip).await {
            Ok(result) => result,
            Err(_) => Err(TesseraError::Timeout(format!(
                "no heartbeat reply within {:?}",
                self.round_trip_timeout
            ))),
        };

        match outcome {
            Ok(reply) => {
                let was_reachable = self.view.borrow().coordinator_reachable();
                let mut flipped = Vec::new();
                self.view.send_modify(|view| flipped = view.apply(&reply));

                if !was_reachable {
                    tracing::info!(
                        version = reply.failure_information_version,
                        bootstrap = reply.all_others_failed,
                        "Failure monitoring session established"
                    );
                }
                for peer in &flipped {
                    tracing::debug!(
                        peer = %peer,
                        failed = self.view.borrow().is_failed(peer),
                        "Peer state changed"
                    );
                }

                self.backoff.reset();
                self.outage_reported = false;
                self.round_trip_timeout =
                    Duration::from_millis(reply.consider_server_failed_timeout_ms);
                Duration::from_millis(reply.client_request_interval_ms)
            }
            Err(err) => {
                if self.view.borrow().coordinator_reachable() {
                    self.view.send_modify(|view| view.coordinator_reachable = false);
                }

                // Loud once per outage, including one already underway at startup
                if self.outage_reported {
                    tracing::debug!(error = %err, "Heartbeat retry failed");
                } else if matches!(err, TesseraError::IncompatibleProtocol { .. }) {
                    tracing::error!(error = %err, "Aggregator refuses our protocol version");
                } else {
                    tracing::warn!(error = %err, "Aggregator unreachable, retrying with backoff");
                }
                self.outage_reported = true;
                self.backoff.next_delay()
            }
        }
    }

    /// Run until shutdown
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(identity = %self.config.identity, "💓 Failure sync loop started");

        loop {
            let wait = tokio::select! {
                wait = self.step() => wait,
                _ = shutdown.recv() => break,
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.recv() => break,
            }
        }

        tracing::info!("💓 Failure sync loop shutting down");
    }
}
