//! Failure monitoring.
//!
//! Implements:
//! - Failure Aggregator (authoritative liveness table with delta replies)
//! - Heartbeat endpoint (UDP) and the participant-side link
//! - Failure Sync Loop (participant heartbeat session)

mod aggregator;
mod link;
mod service;
mod sync_loop;

pub use aggregator::{AggregatorSnapshot, FailureAggregator};
pub use link::UdpLink;
pub use service::HeartbeatService;
pub use sync_loop::{FailureView, HeartbeatLink, SyncLoop, SyncLoopConfig};
