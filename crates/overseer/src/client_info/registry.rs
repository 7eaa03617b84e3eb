//! Connected-client bookkeeping for status reporting.
//!
//! Every client keeps one long-poll outstanding, so the set of in-flight
//! long-polls is the set of connected clients. Each poll registers itself
//! and is removed when its guard drops, whether it completed or the client
//! went away.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tessera_common::{ClientBuildIdentity, OpenDatabaseRequest};

#[derive(Debug, Clone)]
struct ClientRecord {
    supported_versions: Vec<ClientBuildIdentity>,
    issues: Vec<String>,
    trace_log_group: String,
    tls: bool,
    connected_at: DateTime<Utc>,
}

/// Clients currently waiting on the distributor
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<u64, ClientRecord>>,
    next_id: AtomicU64,
}

/// Removes its client from the registry on drop
#[must_use]
pub struct ClientGuard<'a> {
    registry: &'a ClientRegistry,
    id: u64,
}

impl Drop for ClientGuard<'_> {
    fn drop(&mut self) {
        self.registry.clients().remove(&self.id);
    }
}

/// How many connected clients support a given build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionCount {
    pub version: ClientBuildIdentity,
    pub clients: usize,
}

/// Aggregate view of connected clients
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientSummary {
    pub connected: usize,
    pub tls_configured: usize,
    /// Distinct supported builds, in build identity order
    pub supported_versions: Vec<VersionCount>,
    /// Reported issues with the number of clients reporting each
    pub issues: BTreeMap<String, usize>,
    pub trace_log_groups: BTreeSet<String>,
    pub oldest_connection: Option<DateTime<Utc>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<u64, ClientRecord>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a client for as long as the returned guard lives
    pub fn register(&self, request: &OpenDatabaseRequest) -> ClientGuard<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients().insert(
            id,
            ClientRecord {
                supported_versions: request.supported_versions.clone(),
                issues: request.issues.clone(),
                trace_log_group: request.trace_log_group.clone(),
                tls: request.client_tls_configured,
                connected_at: Utc::now(),
            },
        );
        ClientGuard { registry: self, id }
    }

    pub fn len(&self) -> usize {
        self.clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> ClientSummary {
        let clients = self.clients();

        let mut versions: BTreeMap<ClientBuildIdentity, usize> = BTreeMap::new();
        let mut issues: BTreeMap<String, usize> = BTreeMap::new();
        let mut summary = ClientSummary {
            connected: clients.len(),
            ..Default::default()
        };

        for record in clients.values() {
            // A client listing the same build twice still counts once
            let distinct: BTreeSet<&ClientBuildIdentity> =
                record.supported_versions.iter().collect();
            for version in distinct {
                *versions.entry(version.clone()).or_default() += 1;
            }

            let distinct_issues: BTreeSet<&String> = record.issues.iter().collect();
            for issue in distinct_issues {
                *issues.entry(issue.clone()).or_default() += 1;
            }

            if record.tls {
                summary.tls_configured += 1;
            }
            if !record.trace_log_group.is_empty() {
                summary.trace_log_groups.insert(record.trace_log_group.clone());
            }
            summary.oldest_connection = Some(match summary.oldest_connection {
                Some(oldest) => oldest.min(record.connected_at),
                None => record.connected_at,
            });
        }

        summary.supported_versions = versions
            .into_iter()
            .map(|(version, clients)| VersionCount { version, clients })
            .collect();
        summary.issues = issues;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(versions: &[&str], issues: &[&str], tls: bool) -> OpenDatabaseRequest {
        OpenDatabaseRequest {
            supported_versions: versions.iter().map(|v| ClientBuildIdentity::parse(v)).collect(),
            issues: issues.iter().map(|i| i.to_string()).collect(),
            trace_log_group: "default".to_string(),
            client_tls_configured: tls,
            ..Default::default()
        }
    }

    #[test]
    fn test_guard_deregisters() {
        let registry = ClientRegistry::new();
        {
            let _a = registry.register(&request(&[], &[], false));
            let _b = registry.register(&request(&[], &[], false));
            assert_eq!(registry.len(), 2);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_summary_sorts_and_counts_versions() {
        let registry = ClientRegistry::new();
        let _a = registry.register(&request(
            &["6.3.1,abc,p2", "6.2.0,def,p1", "6.2.0,def,p1"],
            &["io_slow"],
            true,
        ));
        let _b = registry.register(&request(
            &["6.2.0,def,p1", "bogus"],
            &["io_slow", "clock_skew"],
            false,
        ));

        let summary = registry.summary();
        assert_eq!(summary.connected, 2);
        assert_eq!(summary.tls_configured, 1);

        let versions: Vec<(String, usize)> = summary
            .supported_versions
            .iter()
            .map(|v| (v.version.to_string(), v.clients))
            .collect();
        assert_eq!(
            versions,
            vec![
                ("Unknown,Unknown,Unknown".to_string(), 1),
                ("6.2.0,def,p1".to_string(), 2),
                ("6.3.1,abc,p2".to_string(), 1),
            ]
        );

        assert_eq!(summary.issues["io_slow"], 2);
        assert_eq!(summary.issues["clock_skew"], 1);
        assert!(summary.trace_log_groups.contains("default"));
        assert!(summary.oldest_connection.is_some());
    }
}
