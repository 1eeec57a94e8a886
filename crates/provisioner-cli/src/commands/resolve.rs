//! Resolve command: print a JSON document with placeholders substituted.

use anyhow::{Context, Result};
use provisioner_config::{ResolveMode, Resolver};
use std::path::Path;

use super::{GlobalArgs, load_overrides, read_json};

pub async fn run(
    global: &GlobalArgs,
    file: &Path,
    env_file: Option<&Path>,
    lenient: bool,
) -> Result<bool> {
    let settings = global.engine_settings()?;
    let store = global
        .store_adapter(&settings)
        .load_all()
        .await
        .context("Failed to load config store")?;
    let overrides = load_overrides(env_file)?;

    let mut options = settings.resolve.clone();
    if lenient {
        options = options.with_mode(ResolveMode::Lenient);
    }

    let input = read_json(file)?;
    let mut resolver = Resolver::new(&store, &options);
    if let Some(overrides) = &overrides {
        resolver = resolver.with_overrides(overrides);
    }
    let resolved = resolver
        .resolve_json(&input)
        .with_context(|| format!("Failed to resolve {}", file.display()))?;

    println!("{}", serde_json::to_string_pretty(&resolved)?);
    Ok(true)
}
