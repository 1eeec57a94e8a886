//! JSON file config backend.
//!
//! The file holds `{"<label>": {"<key>": "<value>"}}`. Writes go to a temp file in
//! the same directory which is then renamed over the original.

use async_trait::async_trait;
use provisioner_core::{ConfigBackend, Error, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

type Labels = BTreeMap<String, BTreeMap<String, String>>;

/// Config backend stored in a local JSON file.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Labels> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(Labels::new()),
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| Error::malformed_json(self.path.display().to_string(), &e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Store file does not exist yet");
                Ok(Labels::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, labels: Labels) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_labels(&path, &labels))
            .await
            .map_err(|e| Error::Store(format!("store write task failed: {}", e)))?
    }
}

/// Write the whole file atomically: temp file in the same directory, then rename.
fn write_labels(path: &Path, labels: &Labels) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let text = serde_json::to_string_pretty(labels)
        .map_err(|e| Error::malformed_json(path.display().to_string(), &e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(text.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[async_trait]
impl ConfigBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn list(&self, label: &str) -> Result<Vec<(String, String)>> {
        let mut labels = self.read().await?;
        Ok(labels.remove(label).unwrap_or_default().into_iter().collect())
    }

    async fn get(&self, key: &str, label: &str) -> Result<Option<String>> {
        let labels = self.read().await?;
        Ok(labels.get(label).and_then(|s| s.get(key)).cloned())
    }

    async fn set(&self, key: &str, value: &str, label: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut labels = self.read().await?;
        labels
            .entry(label.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self.write(labels).await
    }
}
