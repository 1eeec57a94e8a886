//! Config store adapter.

use provisioner_config::{Overrides, ResolveOptions, Resolver};
use provisioner_core::{
    ConfigBackend, ConfigStore, ConfigValue, Error, Result, RetryPolicy, retry,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Loads the per-run snapshot and pushes local writes back to the backend.
///
/// Every backend call goes through the retry wrapper.
#[derive(Clone)]
pub struct ConfigStoreAdapter {
    backend: Arc<dyn ConfigBackend>,
    label: String,
    policy: RetryPolicy,
}

/// Outcome of seeding deployment outputs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub written: Vec<String>,
    /// Entries without a `value` field.
    pub skipped: Vec<String>,
    /// Writes that still failed after retries.
    pub failed: Vec<String>,
}

impl ConfigStoreAdapter {
    pub fn new(backend: Arc<dyn ConfigBackend>, label: impl Into<String>) -> Self {
        Self {
            backend,
            label: label.into(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Load every setting under the label into a snapshot.
    pub async fn load_all(&self) -> Result<ConfigStore> {
        let operation = format!("list {}", self.label);
        let entries = retry(&self.policy, &operation, || self.backend.list(&self.label))
            .await
            .into_result()?;

        info!(
            backend = self.backend.name(),
            label = %self.label,
            count = entries.len(),
            "Loaded config store"
        );
        Ok(ConfigStore::from_raw(&self.label, entries))
    }

    /// Fetch one setting straight from the backend, bypassing the snapshot.
    pub async fn fetch(&self, key: &str) -> Result<Option<ConfigValue>> {
        let operation = format!("get {}", key);
        let raw = retry(&self.policy, &operation, || self.backend.get(key, &self.label))
            .await
            .into_result()?;
        Ok(raw.as_deref().map(ConfigValue::parse))
    }

    /// Read a setting from the snapshot. A required key must be present and
    /// non-empty; an optional one falls back to `default`.
    pub fn get(
        &self,
        store: &ConfigStore,
        key: &str,
        required: bool,
        default: ConfigValue,
    ) -> Result<ConfigValue> {
        if required {
            store.require(key).cloned()
        } else {
            Ok(store.get_or(key, default))
        }
    }

    /// Upsert one setting.
    ///
    /// The snapshot is updated before the backend write. A failed write is logged
    /// and only returned as an error when `required` is set; otherwise `Ok(false)`.
    pub async fn set(
        &self,
        store: &mut ConfigStore,
        key: &str,
        value: ConfigValue,
        required: bool,
    ) -> Result<bool> {
        let raw = value.render();
        store.insert(key, value);
        self.write(key, &raw, required).await
    }

    async fn write(&self, key: &str, raw: &str, required: bool) -> Result<bool> {
        let operation = format!("set {}", key);
        let outcome = retry(&self.policy, &operation, || {
            self.backend.set(key, raw, &self.label)
        })
        .await;

        match outcome.result {
            Ok(()) => {
                debug!(key, label = %self.label, "Stored setting");
                Ok(true)
            }
            Err(e) if required => Err(e),
            Err(e) => {
                warn!(
                    key,
                    label = %self.label,
                    attempts = outcome.attempts,
                    error = %e,
                    "Failed to store setting"
                );
                Ok(false)
            }
        }
    }

    /// Write deployment outputs (`{"KEY": {"value": ...}}`) into the store.
    ///
    /// String values are stored as-is, anything else as JSON text.
    pub async fn seed(
        &self,
        store: &mut ConfigStore,
        outputs: &Value,
        uppercase_keys: bool,
    ) -> Result<SeedReport> {
        let Value::Object(outputs) = outputs else {
            return Err(Error::InvalidDefinition(
                "deployment outputs must be a JSON object".to_string(),
            ));
        };

        let mut report = SeedReport::default();
        for (key, entry) in outputs {
            let key = if uppercase_keys {
                key.to_uppercase()
            } else {
                key.clone()
            };

            let Some(value) = entry.get("value") else {
                warn!(key = %key, "Output has no value, skipping");
                report.skipped.push(key);
                continue;
            };

            let raw = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };

            store.insert(key.as_str(), ConfigValue::parse(&raw));
            if self.write(&key, &raw, false).await? {
                report.written.push(key);
            } else {
                report.failed.push(key);
            }
        }

        info!(
            label = %self.label,
            written = report.written.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Seeded config store"
        );
        Ok(report)
    }

    /// Resolve a derived-settings document against the snapshot without touching
    /// the backend. Entries are resolved in order, so later ones can reference
    /// earlier ones. The snapshot only changes when every entry resolves.
    pub fn stage_derived(
        &self,
        store: &mut ConfigStore,
        values: &Value,
        overrides: Option<&Overrides>,
        options: &ResolveOptions,
    ) -> Result<Vec<(String, ConfigValue)>> {
        let Value::Object(values) = values else {
            return Err(Error::InvalidDefinition(
                "derived settings must be a JSON object".to_string(),
            ));
        };

        let mut staged_store = store.clone();
        let mut staged = Vec::with_capacity(values.len());
        for (key, template) in values {
            let resolved = {
                let mut resolver = Resolver::new(&staged_store, options);
                if let Some(overrides) = overrides {
                    resolver = resolver.with_overrides(overrides);
                }
                resolver.resolve_value(&ConfigValue::from_json(template.clone()))?
            };
            staged_store.insert(key.as_str(), resolved.clone());
            staged.push((key.clone(), resolved));
        }

        *store = staged_store;
        debug!(label = %self.label, count = staged.len(), "Staged derived settings");
        Ok(staged)
    }

    /// Push staged settings to the backend. Returns the keys written; failed
    /// writes are logged and left out.
    pub async fn write_staged(&self, staged: &[(String, ConfigValue)]) -> Vec<String> {
        let mut written = Vec::with_capacity(staged.len());
        for (key, value) in staged {
            if matches!(self.write(key, &value.render(), false).await, Ok(true)) {
                written.push(key.clone());
            }
        }

        info!(
            label = %self.label,
            written = written.len(),
            failed = staged.len() - written.len(),
            "Wrote derived settings"
        );
        written
    }

    /// Stage a derived-settings document and write it back. Nothing reaches the
    /// backend unless every entry resolves.
    pub async fn write_derived(
        &self,
        store: &mut ConfigStore,
        values: &Value,
        overrides: Option<&Overrides>,
        options: &ResolveOptions,
    ) -> Result<Vec<String>> {
        let staged = self.stage_derived(store, values, overrides, options)?;
        Ok(self.write_staged(&staged).await)
    }
}

impl std::fmt::Debug for ConfigStoreAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStoreAdapter")
            .field("backend", &self.backend.name())
            .field("label", &self.label)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` calls of every operation, then delegates.
    struct FlakyBackend {
        inner: MemoryBackend,
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyBackend {
        fn new(inner: MemoryBackend, failures: u32) -> Self {
            Self {
                inner,
                failures,
                calls: AtomicU32::new(0),
            }
        }

        fn fail(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) < self.failures
        }
    }

    #[async_trait]
    impl ConfigBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn list(&self, label: &str) -> Result<Vec<(String, String)>> {
            if self.fail() {
                return Err(Error::Store("unavailable".into()));
            }
            self.inner.list(label).await
        }

        async fn get(&self, key: &str, label: &str) -> Result<Option<String>> {
            if self.fail() {
                return Err(Error::Store("unavailable".into()));
            }
            self.inner.get(key, label).await
        }

        async fn set(&self, key: &str, value: &str, label: &str) -> Result<()> {
            if self.fail() {
                return Err(Error::Store("unavailable".into()));
            }
            self.inner.set(key, value, label).await
        }
    }

    fn adapter(backend: impl ConfigBackend + 'static) -> ConfigStoreAdapter {
        ConfigStoreAdapter::new(Arc::new(backend), "infra")
            .with_retry(RetryPolicy::fixed(3, Duration::from_secs(20)))
    }

    #[tokio::test]
    async fn test_load_all_sniffs_json() {
        let backend = MemoryBackend::with_entries(
            "infra",
            [
                ("ENDPOINT", "https://srch.example.net"),
                ("APPS", r#"[{"internal_name": "INGEST"}]"#),
            ],
        );
        let store = adapter(backend).load_all().await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.label(), "infra");
        assert!(store.get("APPS").unwrap().as_list().is_some());
        assert_eq!(
            store.get("ENDPOINT").and_then(|v| v.as_str()),
            Some("https://srch.example.net")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_all_retries_transient_failures() {
        let backend = FlakyBackend::new(MemoryBackend::with_entries("infra", [("A", "1")]), 2);
        let store = adapter(backend).load_all().await.unwrap();
        assert_eq!(store.require_str("A").unwrap(), "1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_all_gives_up() {
        let backend = FlakyBackend::new(MemoryBackend::new(), 10);
        assert!(matches!(
            adapter(backend).load_all().await,
            Err(Error::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_get_required_and_default() {
        let adapter = adapter(MemoryBackend::new());
        let store = ConfigStore::from_raw("infra", [("A", "1"), ("EMPTY", "")]);

        assert_eq!(
            adapter.get(&store, "A", true, ConfigValue::from("")).unwrap(),
            ConfigValue::from("1")
        );
        assert!(matches!(
            adapter.get(&store, "EMPTY", true, ConfigValue::from("")),
            Err(Error::MissingConfigKey(_))
        ));
        assert_eq!(
            adapter.get(&store, "B", false, ConfigValue::from("dflt")).unwrap(),
            ConfigValue::from("dflt")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_optional_set_updates_snapshot() {
        let adapter = adapter(FlakyBackend::new(MemoryBackend::new(), 10));
        let mut store = ConfigStore::new("infra");

        let written = adapter
            .set(&mut store, "DERIVED", ConfigValue::from("x"), false)
            .await
            .unwrap();
        assert!(!written);
        assert_eq!(store.require_str("DERIVED").unwrap(), "x");

        let err = adapter
            .set(&mut store, "REQUIRED", ConfigValue::from("y"), true)
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_fetch_bypasses_snapshot() {
        let backend = Arc::new(MemoryBackend::with_entries("infra", [("A", "[1, 2]")]));
        let adapter = ConfigStoreAdapter::new(backend, "infra");
        let value = adapter.fetch("A").await.unwrap().unwrap();
        assert_eq!(value.as_list().map(<[ConfigValue]>::len), Some(2));
        assert_eq!(adapter.fetch("B").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_seed_outputs() {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = ConfigStoreAdapter::new(backend.clone(), "infra");
        let mut store = ConfigStore::new("infra");

        let outputs = json!({
            "searchServiceName": {"type": "String", "value": "srch-dev"},
            "modelDeployments": {
                "type": "Array",
                "value": [{"canonical_name": "CHAT", "name": "gpt4-dep"}]
            },
            "replicaCount": {"type": "Int", "value": 2},
            "noValue": {"type": "String"}
        });

        let report = adapter.seed(&mut store, &outputs, true).await.unwrap();
        assert_eq!(
            report.written,
            vec!["SEARCHSERVICENAME", "MODELDEPLOYMENTS", "REPLICACOUNT"]
        );
        assert_eq!(report.skipped, vec!["NOVALUE"]);
        assert!(report.failed.is_empty());

        let stored = backend.snapshot("infra").await;
        assert_eq!(stored["SEARCHSERVICENAME"], "srch-dev");
        assert_eq!(stored["REPLICACOUNT"], "2");
        assert_eq!(
            stored["MODELDEPLOYMENTS"],
            r#"[{"canonical_name":"CHAT","name":"gpt4-dep"}]"#
        );
        assert!(store.get("MODELDEPLOYMENTS").unwrap().as_list().is_some());
    }

    #[tokio::test]
    async fn test_write_derived_resolves_in_order() {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = ConfigStoreAdapter::new(backend.clone(), "infra");
        let mut store = ConfigStore::from_raw(
            "infra",
            [
                ("SEARCH_SERVICE_NAME", "srch-dev"),
                ("APPS", r#"[{"internal_name": "INGEST", "name": "ca-ingest"}]"#),
            ],
        );

        let derived = json!({
            "SEARCH_SERVICE_QUERY_ENDPOINT": "https://{SEARCH_SERVICE_NAME}.search.windows.net",
            "SEARCH_INDEXER_ENDPOINT": "{SEARCH_SERVICE_QUERY_ENDPOINT}/indexers",
            "INGEST_APP": "{APPS.INGEST}"
        });
        let options = ResolveOptions::default();
        let written = adapter
            .write_derived(&mut store, &derived, None, &options)
            .await
            .unwrap();
        assert_eq!(written.len(), 3);

        assert_eq!(
            store.require_str("SEARCH_INDEXER_ENDPOINT").unwrap(),
            "https://srch-dev.search.windows.net/indexers"
        );
        assert!(store.get("INGEST_APP").unwrap().as_object().is_some());

        let stored = backend.snapshot("infra").await;
        assert_eq!(
            stored["INGEST_APP"],
            r#"{"internal_name":"INGEST","name":"ca-ingest"}"#
        );
    }

    #[tokio::test]
    async fn test_write_derived_strict_failure() {
        let adapter = adapter(MemoryBackend::new());
        let mut store = ConfigStore::new("infra");
        let options = ResolveOptions::default();
        let result = adapter
            .write_derived(&mut store, &json!({"X": "{MISSING}"}), None, &options)
            .await;
        assert!(matches!(result, Err(Error::UnresolvedPlaceholder(_))));
        assert!(!store.contains("X"));
    }

    #[tokio::test]
    async fn test_write_derived_writes_nothing_when_a_later_entry_fails() {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = ConfigStoreAdapter::new(backend.clone(), "infra");
        let mut store = ConfigStore::from_raw("infra", [("A", "x")]);
        let options = ResolveOptions::default();

        let result = adapter
            .write_derived(
                &mut store,
                &json!({"FIRST": "{A}", "SECOND": "{MISSING}"}),
                None,
                &options,
            )
            .await;

        assert!(matches!(result, Err(Error::UnresolvedPlaceholder(_))));
        assert!(backend.snapshot("infra").await.is_empty());
        assert!(!store.contains("FIRST"));
    }

    #[tokio::test]
    async fn test_stage_derived_defers_backend_writes() {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = ConfigStoreAdapter::new(backend.clone(), "infra");
        let mut store = ConfigStore::from_raw("infra", [("NAME", "srch-dev")]);
        let options = ResolveOptions::default();

        let staged = adapter
            .stage_derived(
                &mut store,
                &json!({
                    "ENDPOINT": "https://{NAME}.search.windows.net",
                    "INDEXERS": "{ENDPOINT}/indexers"
                }),
                None,
                &options,
            )
            .unwrap();
        assert_eq!(staged.len(), 2);
        assert_eq!(
            store.require_str("INDEXERS").unwrap(),
            "https://srch-dev.search.windows.net/indexers"
        );
        assert!(backend.snapshot("infra").await.is_empty());

        let written = adapter.write_staged(&staged).await;
        assert_eq!(written, vec!["ENDPOINT", "INDEXERS"]);
        assert_eq!(
            backend.snapshot("infra").await["ENDPOINT"],
            "https://srch-dev.search.windows.net"
        );
    }
}
