//! Config store access for the provisioner engine.
//!
//! [`ConfigStoreAdapter`] wraps a [`provisioner_core::ConfigBackend`] with retries
//! and keeps the per-run [`provisioner_core::ConfigStore`] snapshot in sync with
//! local writes.

pub mod adapter;
pub mod file;
pub mod memory;

pub use adapter::{ConfigStoreAdapter, SeedReport};
pub use file::FileBackend;
pub use memory::MemoryBackend;
