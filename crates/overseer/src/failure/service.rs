//! Heartbeat endpoint (UDP)
//!
//! Participants send one JSON datagram per heartbeat and get one back, or
//! several pages when the reply is too large for one datagram. Heartbeats
//! are answered inline on the receive task since the aggregator
//! never suspends. The same task drives the periodic timeout sweep.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{Instant, MissedTickBehavior};

use tessera_common::constants::MAX_DATAGRAM_BYTES;
use tessera_common::protocol::encode_reply;
use tessera_common::{Envelope, FailureMonitoringRequest, HeartbeatOutcome, TesseraError};

use super::FailureAggregator;
use crate::gate::{Refusal, VersionGate};

/// UDP heartbeat service
pub struct HeartbeatService {
    aggregator: Arc<FailureAggregator>,
    gate: VersionGate,
    sweep_interval: Duration,
}

impl HeartbeatService {
    pub fn new(
        aggregator: Arc<FailureAggregator>,
        gate: VersionGate,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            aggregator,
            gate,
            sweep_interval,
        }
    }

    /// Bind the heartbeat socket
    pub async fn bind(addr: &str) -> Result<UdpSocket> {
        UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind heartbeat socket {}", addr))
    }

    /// Answer heartbeats and sweep expired peers until shutdown
    pub async fn run(
        &self,
        socket: UdpSocket,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            addr = %socket.local_addr().context("Heartbeat socket has no address")?,
            "👂 Heartbeat receiver started"
        );

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => {
                            for reply in self.handle_datagram(&buf[..len], addr) {
                                if let Err(e) = socket.send_to(&reply, addr).await {
                                    tracing::warn!(
                                        peer = %addr,
                                        error = %e,
                                        "Failed to send heartbeat reply"
                                    );
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Heartbeat receive error");
                        }
                    }
                }
                _ = sweep.tick() => {
                    let expired = self.aggregator.sweep(Instant::now());
                    if expired > 0 {
                        tracing::debug!(
                            expired,
                            version = self.aggregator.version(),
                            "Sweep marked peers failed"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("👂 Heartbeat receiver shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Process one datagram, producing the reply datagrams (none to drop it)
    fn handle_datagram(&self, data: &[u8], addr: SocketAddr) -> Vec<Vec<u8>> {
        match self.gate.admit_datagram::<FailureMonitoringRequest>(data) {
            Ok(envelope) => {
                let reply = self.aggregator.report_and_query(&envelope.body);
                tracing::trace!(
                    peer = %envelope.body.addresses,
                    changes = reply.changes.len(),
                    version = reply.failure_information_version,
                    "Heartbeat answered"
                );

                match encode_reply(envelope.request_id, reply, MAX_DATAGRAM_BYTES) {
                    Ok(datagrams) => {
                        if datagrams.len() > 1 {
                            tracing::debug!(
                                peer = %addr,
                                pages = datagrams.len(),
                                "Heartbeat reply paged"
                            );
                        }
                        datagrams
                    }
                    Err(e) => {
                        tracing::error!(
                            peer = %addr,
                            error = %e,
                            "Failed to encode heartbeat reply"
                        );
                        Vec::new()
                    }
                }
            }
            Err(Refusal {
                request_id: Some(request_id),
                error: TesseraError::IncompatibleProtocol { declared, minimum },
            }) => {
                tracing::warn!(
                    peer = %addr,
                    declared = %declared,
                    "Rejected heartbeat from incompatible protocol"
                );
                let rejection = Envelope::new(request_id, HeartbeatOutcome::Rejected { minimum });
                match serde_json::to_vec(&rejection) {
                    Ok(bytes) => vec![bytes],
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize heartbeat rejection");
                        Vec::new()
                    }
                }
            }
            Err(refusal) => {
                tracing::warn!(peer = %addr, error = %refusal.error, "Invalid heartbeat datagram");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailureConfig;
    use tessera_common::protocol::ReplyPages;
    use tessera_common::{FailureMonitoringReply, FailureStatus, PeerIdentity, ProtocolVersion};

    fn service() -> (HeartbeatService, Arc<FailureAggregator>) {
        let aggregator = Arc::new(FailureAggregator::new(FailureConfig::default(), 1));
        let service = HeartbeatService::new(
            aggregator.clone(),
            VersionGate::default(),
            Duration::from_millis(500),
        );
        (service, aggregator)
    }

    fn sender() -> SocketAddr {
        "127.0.0.1:7000".parse().unwrap()
    }

    fn heartbeat(request_id: u64, request: FailureMonitoringRequest) -> Vec<u8> {
        serde_json::to_vec(&Envelope::new(request_id, request)).unwrap()
    }

    fn decode(datagram: &[u8]) -> Envelope<HeartbeatOutcome> {
        serde_json::from_slice(datagram).unwrap()
    }

    #[test]
    fn test_datagram_round_trip() {
        let (service, aggregator) = service();
        let me = PeerIdentity::single(sender());
        let request = FailureMonitoringRequest::report(me, FailureStatus::available(), 0);
        let bytes = heartbeat(41, request);

        let replies = service.handle_datagram(&bytes, sender());
        assert_eq!(replies.len(), 1);
        let reply = decode(&replies[0]);

        assert_eq!(reply.request_id, 41);
        match reply.body {
            HeartbeatOutcome::Reply(r) => {
                assert!(r.all_others_failed);
                assert_eq!(r.failure_information_version, aggregator.version());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_large_bootstrap_is_paged() {
        let (service, aggregator) = service();
        for n in 0..1_600u32 {
            let addr = SocketAddr::from(([10, 2, (n / 250) as u8, (n % 250) as u8], 4500));
            let request = FailureMonitoringRequest::report(
                PeerIdentity::single(addr),
                FailureStatus::available(),
                0,
            );
            aggregator.report_and_query(&request);
        }

        let observer = FailureMonitoringRequest::observe(PeerIdentity::single(sender()), 0);
        let replies = service.handle_datagram(&heartbeat(8, observer), sender());
        assert!(replies.len() > 1);
        assert!(replies.iter().all(|d| d.len() <= MAX_DATAGRAM_BYTES));

        let mut pages = ReplyPages::new();
        let mut assembled: Option<FailureMonitoringReply> = None;
        for datagram in &replies {
            let envelope = decode(datagram);
            assert_eq!(envelope.request_id, 8);
            let HeartbeatOutcome::Page { index, count, reply } = envelope.body else {
                panic!("expected a page");
            };
            assembled = pages.add(index, count, reply).unwrap();
        }

        let reply = assembled.unwrap();
        assert!(reply.all_others_failed);
        assert_eq!(reply.changes.len(), 1_600);
        assert_eq!(reply.failure_information_version, aggregator.version());
    }

    #[test]
    fn test_old_protocol_leaves_table_untouched() {
        let (service, aggregator) = service();
        let me = PeerIdentity::single(sender());
        let request = FailureMonitoringRequest::report(me, FailureStatus::available(), 0);
        let mut envelope = Envelope::new(5, request);
        envelope.protocol_version = ProtocolVersion::new(0x0FDB_0000_0000_0001);
        let bytes = serde_json::to_vec(&envelope).unwrap();

        let replies = service.handle_datagram(&bytes, sender());
        assert_eq!(replies.len(), 1);

        assert_eq!(
            decode(&replies[0]).body,
            HeartbeatOutcome::Rejected { minimum: ProtocolVersion::MIN_COMPATIBLE }
        );
        assert_eq!(aggregator.version(), 1);
        assert!(aggregator.snapshot().peers.is_empty());
    }

    #[test]
    fn test_garbage_is_dropped() {
        let (service, aggregator) = service();
        assert!(service.handle_datagram(b"\x00\x01garbage", sender()).is_empty());
        assert_eq!(aggregator.version(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_fails_silent_peer() {
        let config = FailureConfig::default();
        let sweep_interval = Duration::from_millis(config.sweep_interval_ms);
        let aggregator = Arc::new(FailureAggregator::new(config, 1));
        let service =
            HeartbeatService::new(aggregator.clone(), VersionGate::default(), sweep_interval);

        let socket = HeartbeatService::bind("127.0.0.1:0").await.unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
        let task = tokio::spawn(async move { service.run(socket, shutdown_rx).await });

        let me = PeerIdentity::single(sender());
        let reply = aggregator.report_and_query(&FailureMonitoringRequest::report(
            me,
            FailureStatus::available(),
            0,
        ));
        let version = aggregator.version();

        // Still inside the deadline: the tick leaves the peer alone
        tokio::time::sleep(Duration::from_millis(reply.client_request_interval_ms)).await;
        assert!(aggregator.snapshot().peers[0].status.is_available());

        // No further heartbeats; only the service's own tick can fail the peer
        tokio::time::sleep(Duration::from_millis(reply.consider_server_failed_timeout_ms)).await;
        tokio::time::sleep(sweep_interval * 2).await;

        let snapshot = aggregator.snapshot();
        assert!(snapshot.peers[0].status.is_failed());
        assert_eq!(snapshot.version, version + 1);

        let _ = shutdown_tx.send(());
        task.await.unwrap().unwrap();
    }
}
