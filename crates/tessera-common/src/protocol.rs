//! Wire protocol versions and the heartbeat datagram envelope.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TesseraError;
use crate::messages::FailureMonitoringReply;
use crate::types::SystemFailureStatus;

/// Version of the control-plane wire protocol, written as 16 hex digits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ProtocolVersion(u64);

impl ProtocolVersion {
    /// Oldest protocol whose messages this build can decode
    pub const MIN_COMPATIBLE: ProtocolVersion = ProtocolVersion(0x0FDB_00A4_0004_0001);

    /// Protocol spoken by this build
    pub const CURRENT: ProtocolVersion = ProtocolVersion(0x0FDB_00B0_6301_0001);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for ProtocolVersion {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim();
        let digits = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits);

        u64::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|e| TesseraError::InvalidInput(format!("protocol version {:?}: {}", s, e)))
    }
}

impl From<ProtocolVersion> for String {
    fn from(version: ProtocolVersion) -> Self {
        version.to_string()
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = TesseraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Framing shared by every heartbeat datagram.
///
/// Receivers decode only the header fields first (see [`EnvelopeHeader`])
/// so that a message from an incompatible sender is rejected before its
/// body is touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Protocol spoken by the sender
    pub protocol_version: ProtocolVersion,

    /// Sender-chosen id echoed in the reply
    pub request_id: u64,

    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(request_id: u64, body: T) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            request_id,
            body,
        }
    }
}

/// Header view of an [`Envelope`]; the body is skipped
#[derive(Debug, Clone, Deserialize)]
pub struct EnvelopeHeader {
    pub protocol_version: ProtocolVersion,
    pub request_id: u64,
}

/// Reply body sent back over the heartbeat channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HeartbeatOutcome {
    /// The heartbeat was processed
    Reply(FailureMonitoringReply),
    /// One datagram of a processed heartbeat whose reply needs several.
    ///
    /// Every page carries the same version and interval fields and a slice
    /// of the changes; the receiver applies nothing until it holds them all.
    Page {
        index: u32,
        count: u32,
        reply: FailureMonitoringReply,
    },
    /// The heartbeat was refused before processing
    Rejected { minimum: ProtocolVersion },
}

/// Encode a heartbeat reply as datagrams of at most `limit` bytes.
///
/// A reply that fits is sent whole; otherwise its changes are split across
/// [`HeartbeatOutcome::Page`]s.
pub fn encode_reply(
    request_id: u64,
    mut reply: FailureMonitoringReply,
    limit: usize,
) -> Result<Vec<Vec<u8>>, TesseraError> {
    let changes = std::mem::take(&mut reply.changes);
    let skeleton = reply;

    let whole = FailureMonitoringReply {
        changes,
        ..skeleton.clone()
    };
    let outcome = HeartbeatOutcome::Reply(whole);
    let bytes = serde_json::to_vec(&Envelope::new(request_id, &outcome))?;
    if bytes.len() <= limit {
        return Ok(vec![bytes]);
    }
    let HeartbeatOutcome::Reply(whole) = outcome else {
        return Err(TesseraError::Internal("reply changed shape while encoding".to_string()));
    };

    // Space left for changes once the widest possible page framing is paid for
    let framing = serde_json::to_vec(&Envelope::new(
        request_id,
        HeartbeatOutcome::Page {
            index: u32::MAX,
            count: u32::MAX,
            reply: skeleton.clone(),
        },
    ))?;
    let budget = limit.saturating_sub(framing.len());

    let mut pages: Vec<Vec<SystemFailureStatus>> = Vec::new();
    let mut current = Vec::new();
    let mut used = 0;
    for change in whole.changes {
        // Each element costs its own encoding plus a separator
        let size = serde_json::to_vec(&change)?.len() + 1;
        if size > budget {
            return Err(TesseraError::InvalidInput(format!(
                "change for {} does not fit in a {} byte datagram",
                change.addresses, limit
            )));
        }
        if used + size > budget {
            pages.push(std::mem::take(&mut current));
            used = 0;
        }
        used += size;
        current.push(change);
    }
    pages.push(current);

    let count = u32::try_from(pages.len())
        .map_err(|_| TesseraError::InvalidInput("reply needs too many pages".to_string()))?;

    pages
        .into_iter()
        .zip(0..count)
        .map(|(changes, index)| {
            let page = HeartbeatOutcome::Page {
                index,
                count,
                reply: FailureMonitoringReply {
                    changes,
                    ..skeleton.clone()
                },
            };
            Ok(serde_json::to_vec(&Envelope::new(request_id, page))?)
        })
        .collect()
}

/// Collects the pages of one paged heartbeat reply
#[derive(Debug, Default)]
pub struct ReplyPages {
    pages: Vec<Option<FailureMonitoringReply>>,
}

impl ReplyPages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a page, returning the reassembled reply once every page is in
    pub fn add(
        &mut self,
        index: u32,
        count: u32,
        page: FailureMonitoringReply,
    ) -> Result<Option<FailureMonitoringReply>, TesseraError> {
        let (index, count) = (index as usize, count as usize);
        if index >= count {
            return Err(TesseraError::Codec(format!("page {} of {}", index, count)));
        }

        if self.pages.is_empty() {
            self.pages.resize(count, None);
        } else if self.pages.len() != count {
            return Err(TesseraError::Codec(format!(
                "page count changed from {} to {}",
                self.pages.len(),
                count
            )));
        }

        if let Some(seen) = self.pages.iter().flatten().next() {
            if seen.failure_information_version != page.failure_information_version {
                return Err(TesseraError::Codec(
                    "pages from different failure versions".to_string(),
                ));
            }
        }

        self.pages[index] = Some(page);
        if self.pages.iter().any(Option::is_none) {
            return Ok(None);
        }

        let mut pages = std::mem::take(&mut self.pages).into_iter().flatten();
        let Some(mut whole) = pages.next() else {
            return Ok(None);
        };
        for page in pages {
            whole.changes.extend(page.changes);
        }
        Ok(Some(whole))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FailureStatus, PeerIdentity};
    use std::net::SocketAddr;

    #[test]
    fn test_protocol_version_text_form() {
        assert_eq!(ProtocolVersion::MIN_COMPATIBLE.to_string(), "0fdb00a400040001");

        let parsed: ProtocolVersion = "0x0FDB00A400040001".parse().unwrap();
        assert_eq!(parsed, ProtocolVersion::MIN_COMPATIBLE);
        assert!("not-hex".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn test_versions_are_ordered() {
        assert!(ProtocolVersion::MIN_COMPATIBLE < ProtocolVersion::CURRENT);
        assert!(ProtocolVersion::new(1) < ProtocolVersion::MIN_COMPATIBLE);
    }

    fn large_reply(peers: u32) -> FailureMonitoringReply {
        let changes = (0..peers)
            .map(|n| {
                let addr = SocketAddr::from(([10, 1, (n / 250) as u8, (n % 250) as u8], 4500));
                SystemFailureStatus::new(PeerIdentity::single(addr), FailureStatus::available())
            })
            .collect();
        FailureMonitoringReply {
            changes,
            failure_information_version: 42,
            all_others_failed: true,
            client_request_interval_ms: 1_000,
            consider_server_failed_timeout_ms: 5_000,
        }
    }

    #[test]
    fn test_small_reply_is_one_datagram() {
        let reply = large_reply(3);
        let datagrams = encode_reply(9, reply.clone(), 65_507).unwrap();
        assert_eq!(datagrams.len(), 1);

        let envelope: Envelope<HeartbeatOutcome> = serde_json::from_slice(&datagrams[0]).unwrap();
        assert_eq!(envelope.request_id, 9);
        assert_eq!(envelope.body, HeartbeatOutcome::Reply(reply));
    }

    #[test]
    fn test_large_reply_is_paged() {
        let reply = large_reply(2_000);
        let limit = 65_507;
        let datagrams = encode_reply(9, reply.clone(), limit).unwrap();
        assert!(datagrams.len() > 1);
        assert!(datagrams.iter().all(|d| d.len() <= limit));

        // Pages may arrive in any order
        let mut pages = ReplyPages::new();
        let mut assembled = None;
        for datagram in datagrams.iter().rev() {
            let envelope: Envelope<HeartbeatOutcome> = serde_json::from_slice(datagram).unwrap();
            let HeartbeatOutcome::Page { index, count, reply } = envelope.body else {
                panic!("expected a page");
            };
            assert!(assembled.is_none());
            assembled = pages.add(index, count, reply).unwrap();
        }

        assert_eq!(assembled, Some(reply));
    }

    #[test]
    fn test_pages_from_different_versions_rejected() {
        let mut pages = ReplyPages::new();
        let mut first = large_reply(1);
        first.failure_information_version = 1;
        let mut second = large_reply(1);
        second.failure_information_version = 2;

        assert_eq!(pages.add(0, 2, first).unwrap(), None);
        assert!(pages.add(1, 2, second).is_err());
        assert!(pages.add(2, 2, large_reply(1)).is_err());
    }

    #[test]
    fn test_header_skips_body() {
        let raw = r#"{"protocol_version":"0fdb00b063010001","request_id":7,
            "body":{"anything":[1,2,3]}}"#;
        let header: EnvelopeHeader = serde_json::from_str(raw).unwrap();
        assert_eq!(header.request_id, 7);
        assert_eq!(header.protocol_version, ProtocolVersion::CURRENT);
    }
}
