//! Core domain types and traits for the provisioner engine.
//!
//! This crate contains:
//! - Configuration values and the per-run store snapshot
//! - Config store backend trait
//! - Remote API client trait and its error classification
//! - Resource definitions and keys
//! - The retry/backoff wrapper shared by store and remote calls

pub mod error;
pub mod id;
pub mod remote;
pub mod resource;
pub mod retry;
pub mod snapshot;
pub mod store;
pub mod value;

pub use error::{Error, Result};
pub use id::CycleId;
pub use remote::{RemoteClient, RemoteError};
pub use resource::{ResourceDefinition, ResourceKey};
pub use retry::{Backoff, Retried, RetryPolicy, Retryable, retry};
pub use snapshot::ConfigStore;
pub use store::ConfigBackend;
pub use value::ConfigValue;
