//! Remote API clients for the provisioner engine.
//!
//! Provides [`provisioner_core::RemoteClient`] implementations:
//! - HTTP (`{endpoint}/{kind}/{name}?api-version=...`)
//! - Dry run (logs intended calls, never touches the network)

pub mod dry_run;
pub mod http;

pub use dry_run::{DryRunClient, PlannedCall};
pub use http::HttpRemoteClient;
