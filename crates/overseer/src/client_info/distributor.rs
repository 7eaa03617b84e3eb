//! Client Info Distributor
//!
//! Holds the current cluster configuration blob and answers long-polls.
//! A caller presenting the id it already knows is parked until the id
//! changes; every parked caller is released together on change and gets
//! the latest blob, so rapid successive updates coalesce. Parked callers
//! are let go unchanged after a long ceiling so abandoned polls do not pin
//! resources forever.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use tessera_common::{ClusterConfigBlob, ConfigId, OpenDatabaseRequest};

use super::registry::{ClientRegistry, ClientSummary};

/// Long-poll distributor for the cluster configuration
pub struct ClientInfoDistributor {
    current: watch::Sender<Arc<ClusterConfigBlob>>,
    ceiling: Duration,
    registry: ClientRegistry,
}

impl ClientInfoDistributor {
    pub fn new(initial: ClusterConfigBlob, ceiling: Duration) -> Self {
        let (current, _) = watch::channel(Arc::new(initial));
        Self {
            current,
            ceiling,
            registry: ClientRegistry::new(),
        }
    }

    /// The blob clients should be using now
    pub fn current(&self) -> Arc<ClusterConfigBlob> {
        self.current.borrow().clone()
    }

    /// Wait until the current blob's id differs from `known`, or the ceiling passes
    pub async fn await_config(&self, known: ConfigId) -> Arc<ClusterConfigBlob> {
        let mut rx = self.current.subscribe();

        let changed = tokio::time::timeout(self.ceiling, async {
            rx.wait_for(|blob| blob.id != known)
                .await
                .map(|blob| Arc::clone(&blob))
        })
        .await;

        match changed {
            Ok(Ok(blob)) => blob,
            // The sender lives as long as `self`, so only the ceiling lands here
            Ok(Err(_)) | Err(_) => {
                tracing::trace!(known = %known, "Long-poll ceiling reached, answering unchanged");
                self.current()
            }
        }
    }

    /// Serve one client long-poll, tracking the client while it waits
    pub async fn open_database(&self, request: &OpenDatabaseRequest) -> Arc<ClusterConfigBlob> {
        let _registered = self.registry.register(request);
        self.await_config(request.known_client_info_id).await
    }

    /// Replace the blob and wake every waiter.
    ///
    /// Publishing the payload that is already current changes nothing and
    /// returns the current blob.
    pub fn publish(&self, payload: Vec<u8>) -> Arc<ClusterConfigBlob> {
        let mut published = None;

        let replaced = self.current.send_if_modified(|current| {
            if current.has_payload(&payload) {
                published = Some(current.clone());
                return false;
            }

            let mut blob = ClusterConfigBlob::new(payload);
            while blob.id == current.id {
                blob.id = ConfigId::random();
            }
            let blob = Arc::new(blob);
            *current = blob.clone();
            published = Some(blob);
            true
        });

        let blob = published.unwrap_or_else(|| self.current());
        if replaced {
            tracing::info!(
                id = %blob.id,
                bytes = blob.payload.len(),
                waiting = self.current.receiver_count(),
                "📦 Cluster configuration published"
            );
        } else {
            tracing::debug!(id = %blob.id, "Cluster configuration unchanged");
        }
        blob
    }

    pub fn clients(&self) -> ClientSummary {
        self.registry.summary()
    }

    pub fn waiting_clients(&self) -> usize {
        self.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    fn distributor(ceiling: Duration) -> ClientInfoDistributor {
        let initial = ClusterConfigBlob::with_id(ConfigId::new(1), b"v1".to_vec());
        ClientInfoDistributor::new(initial, ceiling)
    }

    #[tokio::test]
    async fn test_returns_immediately_when_id_differs() {
        let dist = distributor(Duration::from_secs(60));
        let mut poll = task::spawn(dist.await_config(ConfigId::NONE));

        let blob = assert_ready!(poll.poll());
        assert_eq!(blob.id, ConfigId::new(1));
    }

    #[tokio::test]
    async fn test_waits_until_published() {
        let dist = distributor(Duration::from_secs(60));
        let mut poll = task::spawn(dist.await_config(ConfigId::new(1)));

        assert_pending!(poll.poll());
        assert_pending!(poll.poll());

        let published = dist.publish(b"v2".to_vec());
        assert!(poll.is_woken());

        let blob = assert_ready!(poll.poll());
        assert_eq!(blob.id, published.id);
        assert_eq!(blob.payload, b"v2");
    }

    #[tokio::test]
    async fn test_all_waiters_released_together() {
        let dist = distributor(Duration::from_secs(60));
        let mut polls: Vec<_> = (0..3)
            .map(|_| task::spawn(dist.await_config(ConfigId::new(1))))
            .collect();
        for poll in polls.iter_mut() {
            assert_pending!(poll.poll());
        }

        let published = dist.publish(b"v2".to_vec());

        for poll in polls.iter_mut() {
            assert!(poll.is_woken());
            let blob = assert_ready!(poll.poll());
            assert_eq!(blob.id, published.id);
        }
    }

    #[tokio::test]
    async fn test_rapid_updates_coalesce() {
        let dist = distributor(Duration::from_secs(60));
        let mut poll = task::spawn(dist.await_config(ConfigId::new(1)));
        assert_pending!(poll.poll());

        dist.publish(b"v2".to_vec());
        let latest = dist.publish(b"v3".to_vec());

        let blob = assert_ready!(poll.poll());
        assert_eq!(blob.id, latest.id);
        assert_eq!(blob.payload, b"v3");
    }

    #[tokio::test]
    async fn test_same_payload_does_not_wake() {
        let dist = distributor(Duration::from_secs(60));
        let mut poll = task::spawn(dist.await_config(ConfigId::new(1)));
        assert_pending!(poll.poll());

        let same = dist.publish(b"v1".to_vec());
        assert_eq!(same.id, ConfigId::new(1));
        assert!(!poll.is_woken());
        assert_pending!(poll.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_answers_unchanged() {
        let dist = distributor(Duration::from_secs(30));
        let started = tokio::time::Instant::now();

        let blob = dist.await_config(ConfigId::new(1)).await;

        assert_eq!(blob.id, ConfigId::new(1));
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_disconnect_leaves_no_trace() {
        let dist = distributor(Duration::from_secs(60));
        let request = OpenDatabaseRequest {
            known_client_info_id: ConfigId::new(1),
            ..Default::default()
        };

        let mut poll = task::spawn(dist.open_database(&request));
        assert_pending!(poll.poll());
        assert_eq!(dist.waiting_clients(), 1);

        drop(poll);
        assert_eq!(dist.waiting_clients(), 0);
        assert_eq!(dist.current().id, ConfigId::new(1));
    }
}
