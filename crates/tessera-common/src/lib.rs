//! # Tessera Common
//!
//! Shared types, wire messages, and utilities used across Tessera components.
//!
//! ## Modules
//! - `types` - Core data structures (PeerIdentity, FailureStatus, ClusterConfigBlob, etc.)
//! - `messages` - Request/reply bodies of the control-plane calls
//! - `client_version` - Client build identity parsing and ordering
//! - `protocol` - Wire protocol versions and the datagram envelope
//! - `error` - Common error types
//! - `constants` - Shared configuration constants

pub mod client_version;
pub mod constants;
pub mod error;
pub mod messages;
pub mod protocol;
pub mod types;

pub use client_version::ClientBuildIdentity;
pub use error::TesseraError;
pub use messages::*;
pub use protocol::{Envelope, HeartbeatOutcome, ProtocolVersion};
pub use types::*;
