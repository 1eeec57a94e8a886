//! Validate command: check a definition document without applying it.

use anyhow::{Context, Result};
use provisioner_config::{DefinitionDocument, ResolveMode, Resolver, build_graph};
use provisioner_core::Error;
use std::path::Path;

use super::{GlobalArgs, load_overrides};

pub async fn run(global: &GlobalArgs, definitions: &Path, env_file: Option<&Path>) -> Result<bool> {
    let settings = global.engine_settings()?;
    let store = global
        .store_adapter(&settings)
        .load_all()
        .await
        .context("Failed to load config store")?;
    let overrides = load_overrides(env_file)?;

    let doc = DefinitionDocument::load(definitions)
        .with_context(|| format!("Failed to load definitions: {}", definitions.display()))?;

    let lenient = settings.resolve.clone().with_mode(ResolveMode::Lenient);
    let mut resolver = Resolver::new(&store, &lenient);
    if let Some(overrides) = &overrides {
        resolver = resolver.with_overrides(overrides);
    }

    let mut unresolved = Vec::new();
    for def in doc.resources() {
        let mut missing = resolver.unresolved_in(&serde_json::Value::String(def.name.clone()));
        for placeholder in resolver.unresolved_in(&def.body) {
            if !missing.contains(&placeholder) {
                missing.push(placeholder);
            }
        }
        for placeholder in missing {
            println!("  ✗ {}: unresolved placeholder {}", def.key(), placeholder);
            unresolved.push(placeholder);
        }
    }

    let resolved = doc.resolve(&resolver)?;
    let graph = build_graph(&resolved, &settings.rules)?;

    for (referrer, target) in graph.external_references() {
        println!("  ! {} references {} outside this document", referrer, target);
    }

    if !unresolved.is_empty() {
        unresolved.sort();
        unresolved.dedup();
        return Err(Error::UnresolvedPlaceholder(unresolved.join(", ")).into());
    }

    println!(
        "✓ {} resource(s) in {} level(s) are valid",
        graph.len(),
        graph.levels().len()
    );
    Ok(true)
}
