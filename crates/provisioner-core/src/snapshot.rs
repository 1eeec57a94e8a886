//! In-memory snapshot of the config store for one scope label.

use std::collections::HashMap;

use crate::value::ConfigValue;
use crate::{Error, Result};

/// All settings visible under one label, loaded once per run.
///
/// Local writes go straight into the snapshot so later resolutions in the same
/// run see them without a re-fetch.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    label: String,
    entries: HashMap<String, ConfigValue>,
}

impl ConfigStore {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: HashMap::new(),
        }
    }

    /// Build a snapshot from raw stored strings, JSON-sniffing each value.
    pub fn from_raw<I, K, V>(label: impl Into<String>, settings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let entries = settings
            .into_iter()
            .map(|(k, v)| (k.into(), ConfigValue::parse(v.as_ref())))
            .collect();
        Self {
            label: label.into(),
            entries,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Fetch a setting that must be present and non-empty.
    pub fn require(&self, key: &str) -> Result<&ConfigValue> {
        match self.entries.get(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(Error::MissingConfigKey(key.to_string())),
        }
    }

    /// Fetch a required setting rendered as text.
    pub fn require_str(&self, key: &str) -> Result<String> {
        self.require(key).map(ConfigValue::render)
    }

    /// Fetch a setting, falling back to `default` when absent or empty.
    pub fn get_or(&self, key: &str, default: ConfigValue) -> ConfigValue {
        match self.entries.get(key) {
            Some(value) if !value.is_empty() => value.clone(),
            _ => default,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ConfigValue) {
        self.entries.insert(key.into(), value);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
