//! Client info distribution.
//!
//! Clients long-poll for the cluster configuration blob; the distributor
//! answers when the blob's id changes and keeps a registry of who is
//! waiting for status reporting.

mod distributor;
mod registry;

pub use distributor::ClientInfoDistributor;
pub use registry::ClientSummary;
