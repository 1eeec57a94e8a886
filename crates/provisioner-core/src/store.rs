//! Config store backend abstraction.

use async_trait::async_trait;

use crate::Result;

/// Trait for key/value configuration backends partitioned by scope label.
///
/// Keys are case-sensitive. Values are raw strings; structure is recovered by
/// [`crate::ConfigValue::parse`].
#[async_trait]
pub trait ConfigBackend: Send + Sync {
    /// Name of this backend, for logs.
    fn name(&self) -> &'static str;

    /// List every key/value pair under a label.
    async fn list(&self, label: &str) -> Result<Vec<(String, String)>>;

    /// Get a single value.
    async fn get(&self, key: &str, label: &str) -> Result<Option<String>>;

    /// Upsert a single value.
    async fn set(&self, key: &str, value: &str, label: &str) -> Result<()>;
}
