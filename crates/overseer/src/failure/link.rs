//! Participant-side UDP link to the heartbeat endpoint.

use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::UdpSocket;

use tessera_common::constants::MAX_DATAGRAM_BYTES;
use tessera_common::protocol::ReplyPages;
use tessera_common::{
    Envelope, FailureMonitoringReply, FailureMonitoringRequest, HeartbeatOutcome, ProtocolVersion,
    TesseraError,
};

use super::HeartbeatLink;
use crate::gate::VersionGate;

/// Heartbeats over a connected UDP socket.
///
/// Replies are matched by request id; anything else arriving on the socket
/// (late replies to abandoned rounds, for instance) is skipped. A paged
/// reply is returned only once all of its pages have arrived; a lost page
/// leaves the round to time out. One round trip at a time per link.
pub struct UdpLink {
    socket: UdpSocket,
    gate: VersionGate,
    next_request_id: AtomicU64,
}

impl UdpLink {
    /// Open a socket connected to the aggregator's heartbeat address
    pub async fn connect(target: SocketAddr, gate: VersionGate) -> Result<Self, TesseraError> {
        let local = if target.is_ipv6() {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;

        Ok(Self {
            socket,
            gate,
            next_request_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TesseraError> {
        Ok(self.socket.local_addr()?)
    }
}

impl HeartbeatLink for UdpLink {
    fn heartbeat(
        &self,
        request: FailureMonitoringRequest,
    ) -> impl Future<Output = Result<FailureMonitoringReply, TesseraError>> + Send {
        async move {
            let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            let bytes = serde_json::to_vec(&Envelope::new(request_id, request))?;
            if bytes.len() > MAX_DATAGRAM_BYTES {
                return Err(TesseraError::InvalidInput(format!(
                    "heartbeat of {} bytes exceeds datagram limit",
                    bytes.len()
                )));
            }
            self.socket.send(&bytes).await?;

            let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
            let mut pages = ReplyPages::new();
            loop {
                let len = self.socket.recv(&mut buf).await?;

                let envelope = match self.gate.admit_datagram::<HeartbeatOutcome>(&buf[..len]) {
                    Ok(envelope) => envelope,
                    Err(refusal) => {
                        tracing::debug!(
                            error = %refusal.error,
                            "Ignoring unreadable heartbeat reply"
                        );
                        continue;
                    }
                };

                if envelope.request_id != request_id {
                    tracing::trace!(
                        expected = request_id,
                        got = envelope.request_id,
                        "Skipping stale reply"
                    );
                    continue;
                }

                match envelope.body {
                    HeartbeatOutcome::Reply(reply) => return Ok(reply),
                    HeartbeatOutcome::Page { index, count, reply } => {
                        if let Some(reply) = pages.add(index, count, reply)? {
                            return Ok(reply);
                        }
                    }
                    HeartbeatOutcome::Rejected { minimum } => {
                        return Err(TesseraError::IncompatibleProtocol {
                            declared: ProtocolVersion::CURRENT,
                            minimum,
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailureConfig;
    use crate::failure::{FailureAggregator, HeartbeatService, SyncLoop, SyncLoopConfig};
    use std::sync::Arc;
    use std::time::Duration;
    use tessera_common::{FailureStatus, PeerIdentity};
    use tokio::sync::{broadcast, watch};

    async fn start_service(
        gate: VersionGate,
    ) -> (SocketAddr, Arc<FailureAggregator>, broadcast::Sender<()>) {
        let aggregator = Arc::new(FailureAggregator::new(FailureConfig::default(), 1));
        let socket = HeartbeatService::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let service = HeartbeatService::new(aggregator.clone(), gate, Duration::from_millis(100));
        tokio::spawn(async move { service.run(socket, shutdown_rx).await });

        (addr, aggregator, shutdown_tx)
    }

    #[tokio::test]
    async fn test_heartbeat_over_udp() {
        let (addr, aggregator, shutdown) = start_service(VersionGate::default()).await;
        let link = UdpLink::connect(addr, VersionGate::default()).await.unwrap();
        let me = PeerIdentity::single(link.local_addr().unwrap());

        let reply = link
            .heartbeat(FailureMonitoringRequest::report(me.clone(), FailureStatus::available(), 0))
            .await
            .unwrap();

        assert!(reply.all_others_failed);
        assert_eq!(reply.changes.len(), 1);
        assert_eq!(reply.changes[0].addresses, me);
        assert_eq!(aggregator.snapshot().peers.len(), 1);

        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_rejection_reaches_participant() {
        let strict = VersionGate::new(ProtocolVersion::new(u64::MAX));
        let (addr, aggregator, shutdown) = start_service(strict).await;
        let link = UdpLink::connect(addr, VersionGate::default()).await.unwrap();
        let me = PeerIdentity::single(link.local_addr().unwrap());

        let err = link
            .heartbeat(FailureMonitoringRequest::report(me, FailureStatus::available(), 0))
            .await
            .unwrap_err();

        assert!(matches!(err, TesseraError::IncompatibleProtocol { .. }));
        assert!(aggregator.snapshot().peers.is_empty());

        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_large_bootstrap_over_udp() {
        let (addr, aggregator, shutdown) = start_service(VersionGate::default()).await;
        for n in 0..1_600u32 {
            let peer = SocketAddr::from(([10, 3, (n / 250) as u8, (n % 250) as u8], 4500));
            aggregator.report_and_query(&FailureMonitoringRequest::report(
                PeerIdentity::single(peer),
                FailureStatus::available(),
                0,
            ));
        }

        let link = UdpLink::connect(addr, VersionGate::default()).await.unwrap();
        let me = PeerIdentity::single(link.local_addr().unwrap());
        let reply = link.heartbeat(FailureMonitoringRequest::observe(me, 0)).await.unwrap();

        assert!(reply.all_others_failed);
        assert_eq!(reply.changes.len(), 1_600);
        assert_eq!(reply.failure_information_version, aggregator.version());

        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_two_participants_see_each_other() {
        let (addr, _aggregator, shutdown) = start_service(VersionGate::default()).await;

        let mut loops = Vec::new();
        let mut identities = Vec::new();
        for _ in 0..2 {
            let link = UdpLink::connect(addr, VersionGate::default()).await.unwrap();
            let identity = PeerIdentity::single(link.local_addr().unwrap());
            let (status_tx, rx) = watch::channel(FailureStatus::available());
            identities.push(identity.clone());
            loops.push((SyncLoop::monitored(link, SyncLoopConfig::new(identity), rx), status_tx));
        }

        // First round registers both, second round lets each learn the other
        for (sync, _) in loops.iter_mut() {
            sync.step().await;
        }
        for (sync, _) in loops.iter_mut() {
            sync.step().await;
        }

        assert!(!loops[0].0.view().is_failed(&identities[1]));
        assert!(!loops[1].0.view().is_failed(&identities[0]));

        let _ = shutdown.send(());
    }
}
