//! CLI command implementations.

pub mod apply;
pub mod resolve;
pub mod seed;
pub mod validate;

use anyhow::{Context, Result};
use provisioner_config::{ConfigError, EngineSettings, Overrides, load_env_file, load_settings};
use provisioner_store::{ConfigStoreAdapter, FileBackend};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Arguments shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub settings: PathBuf,
    pub store: PathBuf,
    pub label: Option<String>,
}

impl GlobalArgs {
    /// Engine settings with command-line overrides applied.
    pub fn engine_settings(&self) -> Result<EngineSettings> {
        let mut settings = load_settings(&self.settings).with_context(|| {
            format!("Failed to load settings: {}", self.settings.display())
        })?;
        if let Some(label) = &self.label {
            settings.label = label.clone();
        }
        Ok(settings)
    }

    pub fn store_adapter(&self, settings: &EngineSettings) -> ConfigStoreAdapter {
        ConfigStoreAdapter::new(
            Arc::new(FileBackend::new(&self.store)),
            settings.label.clone(),
        )
        .with_retry(settings.store_retry.clone())
    }
}

pub fn load_overrides(path: Option<&Path>) -> Result<Option<Overrides>> {
    path.map(|p| {
        load_env_file(p).with_context(|| format!("Failed to read env file: {}", p.display()))
    })
    .transpose()
}

pub fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .map_err(ConfigError::from)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&text)
        .map_err(|e| provisioner_core::Error::malformed_json(path.display().to_string(), &e))?;
    Ok(value)
}

/// True when the error was caused by bad input rather than a failed run.
pub fn is_configuration_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(e) = cause.downcast_ref::<provisioner_core::Error>() {
            return e.is_configuration();
        }
        match cause.downcast_ref::<ConfigError>() {
            Some(ConfigError::Engine(e)) => e.is_configuration(),
            Some(_) => true,
            None => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_configuration_errors_are_classified() {
        let err = anyhow::Error::from(provisioner_core::Error::UnresolvedPlaceholder(
            "{MISSING}".into(),
        ))
        .context("Failed to build plan");
        assert!(is_configuration_error(&err));

        let err = anyhow::Error::from(ConfigError::CycleDetected("a -> b -> a".into()));
        assert!(is_configuration_error(&err));

        let err = anyhow::Error::from(ConfigError::Engine(
            provisioner_core::Error::MissingConfigKey("SEARCH_API_VERSION".into()),
        ));
        assert!(is_configuration_error(&err));

        let err = anyhow::Error::from(provisioner_core::Error::Store("unavailable".into()));
        assert!(!is_configuration_error(&err));
    }

    #[test]
    fn test_label_flag_overrides_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "label \"from-file\"").unwrap();

        let mut global = GlobalArgs {
            settings: file.path().to_path_buf(),
            store: PathBuf::from("store.json"),
            label: None,
        };
        assert_eq!(global.engine_settings().unwrap().label, "from-file");

        global.label = Some("gpt-rag".into());
        assert_eq!(global.engine_settings().unwrap().label, "gpt-rag");
    }

    #[test]
    fn test_read_json_reports_malformed_input() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = read_json(file.path()).unwrap_err();
        assert!(is_configuration_error(&err));
    }
}
