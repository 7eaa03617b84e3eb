//! Failure Aggregator
//!
//! Owns the authoritative peer liveness table. Every heartbeat updates the
//! sender's entry and is answered with the changes since the version the
//! sender last saw (delta compression). Peers that stop heartbeating are
//! marked failed by a sweep once their deadline passes; silence is the only
//! failure signal, there is no explicit disconnect.
//!
//! The table, its version counter and the change history sit behind a single
//! mutex, so every reply is computed against one consistent
//! `(table, version)` pair. Nothing in here awaits.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use tessera_common::{
    FailureMonitoringReply, FailureMonitoringRequest, FailureStatus, PeerIdentity,
    SystemFailureStatus,
};

use crate::config::FailureConfig;

/// A monitored participant's row in the table
#[derive(Debug, Clone)]
struct PeerEntry {
    status: FailureStatus,
    last_heartbeat: Instant,
    /// The peer is failed by the sweep once `now` reaches this
    deadline: Instant,
}

/// One table mutation; `before` is the peer's status at `version - 1`
#[derive(Debug, Clone)]
struct Change {
    version: u64,
    peer: PeerIdentity,
    before: Option<FailureStatus>,
}

#[derive(Debug)]
struct FailureTable {
    entries: HashMap<PeerIdentity, PeerEntry>,
    version: u64,
    /// Smallest `since` version a delta can still be computed for
    oldest_answerable: u64,
    history: VecDeque<Change>,
    /// Unmonitored callers, tracked only for load estimation
    observers: HashMap<PeerIdentity, Instant>,
}

impl FailureTable {
    fn new(initial_version: u64) -> Self {
        Self {
            entries: HashMap::new(),
            version: initial_version,
            oldest_answerable: initial_version,
            history: VecDeque::new(),
            observers: HashMap::new(),
        }
    }

    /// Bump the version and log the change. Callers mutate `entries` first.
    fn record(&mut self, peer: PeerIdentity, before: Option<FailureStatus>, limit: usize) {
        self.version += 1;
        self.history.push_back(Change {
            version: self.version,
            peer,
            before,
        });

        while self.history.len() > limit {
            if let Some(dropped) = self.history.pop_front() {
                self.oldest_answerable = dropped.version;
            }
        }
    }

    fn is_answerable(&self, since: u64) -> bool {
        since >= self.oldest_answerable && since <= self.version
    }

    /// Peers whose status at `since` differs from their status now
    fn delta_since(&self, since: u64) -> Vec<SystemFailureStatus> {
        let start = self.history.partition_point(|c| c.version <= since);

        // The first change after `since` tells us the status at `since`
        let mut at_since: BTreeMap<&PeerIdentity, Option<FailureStatus>> = BTreeMap::new();
        for change in self.history.range(start..) {
            at_since.entry(&change.peer).or_insert(change.before);
        }

        at_since
            .into_iter()
            .filter_map(|(peer, before)| {
                let now = self.entries.get(peer).map(|e| e.status);
                (now != before).then(|| {
                    SystemFailureStatus::new(
                        peer.clone(),
                        now.unwrap_or_else(FailureStatus::failed),
                    )
                })
            })
            .collect()
    }

    /// Every entry that differs from the all-failed baseline
    fn delta_from_all_failed(&self) -> Vec<SystemFailureStatus> {
        let mut changes: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, e)| e.status != FailureStatus::failed())
            .map(|(peer, e)| SystemFailureStatus::new(peer.clone(), e.status))
            .collect();
        changes.sort_by(|a, b| a.addresses.cmp(&b.addresses));
        changes
    }

    /// Callers currently generating heartbeat load
    fn active_callers(&self) -> usize {
        self.entries.values().filter(|e| e.status.is_available()).count() + self.observers.len()
    }
}

/// `now + wait_ms`, clamped to a far-off instant when that is not representable
fn deadline_after(now: Instant, wait_ms: u64) -> Instant {
    now.checked_add(Duration::from_millis(wait_ms))
        .unwrap_or_else(|| now + Duration::from_secs(u64::from(u32::MAX)))
}

/// Point-in-time view of one table row
#[derive(Debug, Clone, Serialize)]
pub struct PeerSnapshot {
    pub addresses: PeerIdentity,
    pub status: FailureStatus,
    pub last_heartbeat_ms_ago: u64,
}

/// Point-in-time view of the whole table
#[derive(Debug, Clone, Serialize)]
pub struct AggregatorSnapshot {
    pub version: u64,
    pub oldest_answerable_version: u64,
    pub peers: Vec<PeerSnapshot>,
}

impl AggregatorSnapshot {
    pub fn failed_count(&self) -> usize {
        self.peers.iter().filter(|p| p.status.is_failed()).count()
    }
}

/// The coordinator's failure aggregator
pub struct FailureAggregator {
    config: FailureConfig,
    table: Mutex<FailureTable>,
}

impl FailureAggregator {
    /// Create an aggregator whose version space starts at `initial_version`.
    ///
    /// Callers that present a version from another aggregator instance are
    /// only answered correctly if the two version spaces do not overlap, so
    /// the process seeds this from the wall clock.
    pub fn new(config: FailureConfig, initial_version: u64) -> Self {
        Self {
            config,
            table: Mutex::new(FailureTable::new(initial_version)),
        }
    }

    fn table(&self) -> MutexGuard<'_, FailureTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current failure information version
    pub fn version(&self) -> u64 {
        self.table().version
    }

    /// Process a heartbeat received now
    pub fn report_and_query(&self, request: &FailureMonitoringRequest) -> FailureMonitoringReply {
        self.report_and_query_at(request, Instant::now())
    }

    /// Process a heartbeat as if received at `now`
    pub fn report_and_query_at(
        &self,
        request: &FailureMonitoringRequest,
        now: Instant,
    ) -> FailureMonitoringReply {
        let mut table = self.table();
        self.sweep_locked(&mut table, now);

        let mut interval_ms = self.tuned_interval_ms(&table);

        match request.sender_status {
            Some(status) => {
                table.observers.remove(&request.addresses);
                let wait_ms = interval_ms.saturating_add(self.config.peer_timeout_ms);
                let deadline = deadline_after(now, wait_ms);

                let before = table.entries.get(&request.addresses).map(|e| e.status);
                table.entries.insert(
                    request.addresses.clone(),
                    PeerEntry {
                        status,
                        last_heartbeat: now,
                        deadline,
                    },
                );

                if before != Some(status) {
                    match before {
                        None => tracing::info!(
                            peer = %request.addresses,
                            failed = status.failed,
                            "New peer monitored"
                        ),
                        Some(prev) if prev.failed != status.failed => {
                            tracing::info!(
                                peer = %request.addresses,
                                failed = status.failed,
                                "Peer status changed"
                            )
                        }
                        Some(_) => {}
                    }
                    table.record(request.addresses.clone(), before, self.config.history_limit);
                }
            }
            None => {
                table.observers.insert(request.addresses.clone(), now);
                interval_ms = interval_ms.max(self.config.observer_interval_ms);
            }
        }

        let since = request.failure_information_version;
        let (changes, all_others_failed) = if table.is_answerable(since) {
            (table.delta_since(since), false)
        } else {
            tracing::debug!(
                peer = %request.addresses,
                since,
                current = table.version,
                "Unknown failure version, replying relative to all failed"
            );
            (table.delta_from_all_failed(), true)
        };

        FailureMonitoringReply {
            changes,
            failure_information_version: table.version,
            all_others_failed,
            client_request_interval_ms: interval_ms,
            consider_server_failed_timeout_ms: interval_ms
                .saturating_add(self.config.server_failed_timeout_ms),
        }
    }

    /// Mark every peer whose deadline has passed as failed.
    ///
    /// Returns how many peers changed state.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut table = self.table();
        self.sweep_locked(&mut table, now)
    }

    fn sweep_locked(&self, table: &mut FailureTable, now: Instant) -> usize {
        let expired: Vec<PeerIdentity> = table
            .entries
            .iter()
            .filter(|(_, e)| e.status.is_available() && now >= e.deadline)
            .map(|(peer, _)| peer.clone())
            .collect();

        for peer in &expired {
            let Some(entry) = table.entries.get_mut(peer) else {
                continue;
            };
            let before = entry.status;
            entry.status = FailureStatus::failed();

            tracing::warn!(
                peer = %peer,
                silent_ms = now.duration_since(entry.last_heartbeat).as_millis() as u64,
                "Peer marked failed (heartbeat timeout)"
            );
            table.record(peer.clone(), Some(before), self.config.history_limit);
        }

        // Observers are forgotten once they have been quiet for two of their intervals
        let observer_ttl =
            Duration::from_millis(self.config.observer_interval_ms.saturating_mul(2));
        table
            .observers
            .retain(|_, seen| now.saturating_duration_since(*seen) < observer_ttl);

        expired.len()
    }

    /// Remove a peer from the table (cluster membership change)
    pub fn remove_peer(&self, peer: &PeerIdentity) -> bool {
        let mut table = self.table();
        match table.entries.remove(peer) {
            Some(entry) => {
                table.record(peer.clone(), Some(entry.status), self.config.history_limit);
                tracing::info!(
                    peer = %peer,
                    version = table.version,
                    "Peer removed from failure table"
                );
                true
            }
            None => false,
        }
    }

    /// Copy of the table for status and admin views
    pub fn snapshot(&self) -> AggregatorSnapshot {
        let table = self.table();
        let now = Instant::now();

        let mut peers: Vec<PeerSnapshot> = table
            .entries
            .iter()
            .map(|(peer, e)| PeerSnapshot {
                addresses: peer.clone(),
                status: e.status,
                last_heartbeat_ms_ago: now
                    .saturating_duration_since(e.last_heartbeat)
                    .as_millis() as u64,
            })
            .collect();
        peers.sort_by(|a, b| a.addresses.cmp(&b.addresses));

        AggregatorSnapshot {
            version: table.version,
            oldest_answerable_version: table.oldest_answerable,
            peers,
        }
    }

    /// Heartbeat interval for monitored callers, stretched under load
    fn tuned_interval_ms(&self, table: &FailureTable) -> u64 {
        let callers = table.active_callers() as u64;
        let rate = self.config.target_heartbeats_per_sec.max(1);
        let load_ms = callers.saturating_mul(1000) / rate;
        let floor = self.config.heartbeat_interval_ms;
        load_ms.clamp(floor, self.config.max_heartbeat_interval_ms.max(floor))
    }
}
