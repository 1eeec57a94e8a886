//! Seed command: write deployment outputs into the config store.

use anyhow::{Context, Result};
use std::path::Path;

use super::{GlobalArgs, read_json};

/// Returns false when any output could not be written.
pub async fn run(global: &GlobalArgs, outputs: &Path, uppercase: bool) -> Result<bool> {
    let settings = global.engine_settings()?;
    let adapter = global.store_adapter(&settings);
    let mut store = adapter
        .load_all()
        .await
        .context("Failed to load config store")?;

    let outputs = read_json(outputs)?;
    let report = adapter.seed(&mut store, &outputs, uppercase).await?;

    println!("Seeded label '{}'", adapter.label());
    for key in &report.written {
        println!("  ✓ {}", key);
    }
    for key in &report.skipped {
        println!("  ⊘ {} (no value)", key);
    }
    for key in &report.failed {
        println!("  ✗ {}", key);
    }

    Ok(report.failed.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seed_uppercases_and_stores_raw_values() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = dir.path().join("outputs.json");
        std::fs::write(
            &outputs,
            r#"{
                "searchServiceName": {"type": "String", "value": "srch-1"},
                "modelDeployments": {"type": "Array", "value": [{"name": "chat"}]},
                "noValue": {"type": "String"}
            }"#,
        )
        .unwrap();

        let store = dir.path().join("store.json");
        let global = GlobalArgs {
            settings: dir.path().join("missing.kdl"),
            store: store.clone(),
            label: Some("gpt-rag".into()),
        };

        assert!(run(&global, &outputs, true).await.unwrap());

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&store).unwrap()).unwrap();
        assert_eq!(saved["gpt-rag"]["SEARCHSERVICENAME"], "srch-1");
        assert_eq!(saved["gpt-rag"]["MODELDEPLOYMENTS"], r#"[{"name":"chat"}]"#);
        assert!(saved["gpt-rag"].get("NOVALUE").is_none());
    }
}
