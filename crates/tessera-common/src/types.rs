//! Core types shared across Tessera components.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::SocketAddr;

/// One logical participant, named by its network endpoints.
///
/// The first address is the primary; the rest are alternates (for example
/// the other half of a dual-stack pair). Two identities are equal only when
/// their lists match element for element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerIdentity(Vec<SocketAddr>);

impl PeerIdentity {
    pub fn new(addresses: Vec<SocketAddr>) -> Self {
        Self(addresses)
    }

    /// Identity with a single address
    pub fn single(address: SocketAddr) -> Self {
        Self(vec![address])
    }

    pub fn primary(&self) -> Option<SocketAddr> {
        self.0.first().copied()
    }

    pub fn addresses(&self) -> &[SocketAddr] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<SocketAddr> for PeerIdentity {
    fn from(address: SocketAddr) -> Self {
        Self::single(address)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, addr) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", addr)?;
        }
        Ok(())
    }
}

/// Liveness of a participant, as reported by itself or inferred by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailureStatus {
    /// True when the participant is (or declares itself) failed
    pub failed: bool,

    /// Optional diagnostic metric supplied by the participant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<u64>,
}

impl FailureStatus {
    /// A participant that is up
    pub const fn available() -> Self {
        Self { failed: false, metric: None }
    }

    /// The baseline status: failed, with no diagnostic attached
    pub const fn failed() -> Self {
        Self { failed: true, metric: None }
    }

    pub fn with_metric(mut self, metric: u64) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_available(&self) -> bool {
        !self.failed
    }
}

impl Default for FailureStatus {
    fn default() -> Self {
        Self::failed()
    }
}

/// A single entry of a failure delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemFailureStatus {
    pub addresses: PeerIdentity,
    pub status: FailureStatus,
}

impl SystemFailureStatus {
    pub fn new(addresses: PeerIdentity, status: FailureStatus) -> Self {
        Self { addresses, status }
    }
}

/// Opaque identifier of a cluster configuration blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ConfigId(u128);

impl ConfigId {
    /// The id no published blob ever carries; a fresh client sends this
    pub const NONE: ConfigId = ConfigId(0);

    pub fn new(raw: u128) -> Self {
        Self(raw)
    }

    /// Generate a random, non-zero id
    pub fn random() -> Self {
        loop {
            let raw: u128 = rand::random();
            if raw != 0 {
                return Self(raw);
            }
        }
    }

    pub fn value(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl From<ConfigId> for String {
    fn from(id: ConfigId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ConfigId {
    type Error = std::num::ParseIntError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        u128::from_str_radix(&value, 16).map(Self)
    }
}

/// The cluster configuration distributed to clients.
///
/// The payload is opaque to the control plane; only `id` matters for
/// change detection. A blob is never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfigBlob {
    /// Identity of this blob
    pub id: ConfigId,

    /// Hex-encoded SHA-256 of the payload
    pub digest: String,

    /// Opaque payload (base64 on the wire)
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl ClusterConfigBlob {
    /// Create a blob with a freshly generated id
    pub fn new(payload: Vec<u8>) -> Self {
        Self::with_id(ConfigId::random(), payload)
    }

    pub fn with_id(id: ConfigId, payload: Vec<u8>) -> Self {
        Self {
            id,
            digest: payload_digest(&payload),
            payload,
        }
    }

    /// Check whether this blob carries the given payload
    pub fn has_payload(&self, payload: &[u8]) -> bool {
        self.digest == payload_digest(payload)
    }
}

/// Hex SHA-256 of a configuration payload
pub fn payload_digest(payload: &[u8]) -> String {
    Sha256::digest(payload)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A worker process registered with the coordinator on behalf of clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerIdentity {
    /// Stable per-process identity token
    pub id: String,

    /// Where the worker listens
    pub address: SocketAddr,
}
