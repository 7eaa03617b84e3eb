//! Shared constants for Tessera components.

/// Default coordinator HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:4600";

/// Default coordinator UDP heartbeat address
pub const DEFAULT_HEARTBEAT_ADDR: &str = "127.0.0.1:4601";

/// Base interval between a monitored participant's heartbeats (ms)
pub const HEARTBEAT_INTERVAL_MS: u64 = 1_000;

/// Upper bound the self-tuned heartbeat interval may reach (ms)
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 10_000;

/// Interval handed to observers that are not themselves monitored (ms)
pub const OBSERVER_INTERVAL_MS: u64 = 5_000;

/// Heartbeat load the coordinator aims to stay under
pub const TARGET_HEARTBEATS_PER_SEC: u64 = 2_000;

/// Silence beyond the told interval before a peer is marked failed (ms)
pub const PEER_TIMEOUT_MS: u64 = 4_000;

/// Silence beyond the told interval before a participant gives up on the coordinator (ms)
pub const SERVER_FAILED_TIMEOUT_MS: u64 = 4_000;

/// Background sweep period for expired heartbeats (ms)
pub const SWEEP_INTERVAL_MS: u64 = 500;

/// Number of failure table changes retained for delta replies
pub const FAILURE_HISTORY_LIMIT: usize = 10_000;

/// Ceiling on how long an unchanged long-poll is held (seconds)
pub const LONG_POLL_CEILING_SECS: u64 = 120;

/// Largest heartbeat datagram accepted or sent (the IPv4 UDP payload limit).
/// Replies that do not fit are split into pages.
pub const MAX_DATAGRAM_BYTES: usize = 65_507;

/// HTTP header names
pub mod headers {
    /// Wire protocol version declared by the sender (hex)
    pub const X_PROTOCOL_VERSION: &str = "X-Protocol-Version";

    /// Advisory client build identity (`build,source,protocol`)
    pub const X_CLIENT_VERSION: &str = "X-Client-Version";
}
