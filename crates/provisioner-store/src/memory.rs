//! In-memory config backend for tests and dry runs.

use async_trait::async_trait;
use provisioner_core::{ConfigBackend, Result};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Config backend held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    labels: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-populated with settings under one label.
    pub fn with_entries<I, K, V>(label: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let settings = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            labels: RwLock::new(HashMap::from([(label.to_string(), settings)])),
        }
    }

    /// Copy of everything stored under a label.
    pub async fn snapshot(&self, label: &str) -> BTreeMap<String, String> {
        self.labels
            .read()
            .await
            .get(label)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConfigBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list(&self, label: &str) -> Result<Vec<(String, String)>> {
        Ok(self.snapshot(label).await.into_iter().collect())
    }

    async fn get(&self, key: &str, label: &str) -> Result<Option<String>> {
        let labels = self.labels.read().await;
        Ok(labels.get(label).and_then(|s| s.get(key)).cloned())
    }

    async fn set(&self, key: &str, value: &str, label: &str) -> Result<()> {
        let mut labels = self.labels.write().await;
        labels
            .entry(label.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
