//! Apply command: resolve definitions and reconcile them remotely.

use anyhow::{Context, Result};
use provisioner_config::{DefinitionDocument, Resolver};
use provisioner_core::RemoteClient;
use provisioner_remote::{DryRunClient, HttpRemoteClient};
use provisioner_scheduler::{Outcome, Plan, ReconcileEvent, Reconciler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::{GlobalArgs, load_overrides, read_json};

#[derive(Debug, Clone)]
pub struct ApplyArgs {
    pub definitions: PathBuf,
    pub env_file: Option<PathBuf>,
    pub derived: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub concurrency: Option<usize>,
    pub dry_run: bool,
}

/// Returns whether every operation succeeded.
pub async fn run(global: &GlobalArgs, args: ApplyArgs) -> Result<bool> {
    let mut settings = global.engine_settings()?;
    if let Some(concurrency) = args.concurrency {
        anyhow::ensure!(concurrency >= 1, "--concurrency must be at least 1");
        settings.concurrency = concurrency;
    }

    let adapter = global.store_adapter(&settings);
    let mut store = adapter
        .load_all()
        .await
        .context("Failed to load config store")?;
    let overrides = load_overrides(args.env_file.as_deref())?;

    // Derived settings are only resolved here; nothing is written back until
    // every configuration check below has passed.
    let staged = match &args.derived {
        Some(path) => {
            let derived = read_json(path)?;
            adapter
                .stage_derived(&mut store, &derived, overrides.as_ref(), &settings.resolve)
                .with_context(|| {
                    format!("Failed to resolve derived settings: {}", path.display())
                })?
        }
        None => Vec::new(),
    };

    let doc = DefinitionDocument::load(&args.definitions).with_context(|| {
        format!(
            "Failed to load definitions: {}",
            args.definitions.display()
        )
    })?;

    let plan = {
        let mut resolver = Resolver::new(&store, &settings.resolve);
        if let Some(overrides) = &overrides {
            resolver = resolver.with_overrides(overrides);
        }
        Plan::prepare(&doc, &resolver, &settings.rules).context("Failed to build apply plan")?
    };

    let client: Arc<dyn RemoteClient> = if args.dry_run {
        Arc::new(DryRunClient::new())
    } else {
        let client = match &args.endpoint {
            Some(endpoint) => {
                let api_version = store
                    .get(&settings.remote.api_version_key)
                    .map(|v| v.render())
                    .or_else(|| settings.remote.default_api_version.clone())
                    .ok_or_else(|| {
                        provisioner_core::Error::MissingConfigKey(
                            settings.remote.api_version_key.clone(),
                        )
                    })?;
                HttpRemoteClient::new(endpoint, api_version, settings.remote.request_timeout)?
            }
            None => HttpRemoteClient::from_store(&store, &settings.remote)?,
        };
        let client = match &args.token {
            Some(token) => client.with_token(token),
            None => client,
        };
        Arc::new(client)
    };

    if !staged.is_empty() {
        let written = adapter.write_staged(&staged).await;
        println!("Wrote {} of {} derived setting(s)", written.len(), staged.len());
    }

    println!(
        "Applying {} resource(s) in {} level(s) via {}",
        plan.len(),
        plan.levels().len(),
        client.name()
    );
    for (referrer, target) in plan.graph().external_references() {
        println!("  ! {} references {} outside this document", referrer, target);
    }

    let reconciler = Reconciler::from_settings(client, &settings);
    println!("\n--- Starting reconcile ---\n");

    let (mut rx, handle) = reconciler.execute(plan);

    while let Some(event) = rx.recv().await {
        match event {
            ReconcileEvent::OperationStarted { key, operation } => {
                println!("▶ {} {}", operation, key);
            }
            ReconcileEvent::OperationCompleted { record } => {
                let marker = match &record.outcome {
                    Outcome::Succeeded | Outcome::AlreadyAbsent => "✓",
                    Outcome::Failed { .. } | Outcome::TimedOut => "✗",
                    Outcome::Skipped { .. } => "⊘",
                };
                println!(
                    "{} {} {} ({}, {} attempt(s), {}ms)",
                    marker,
                    record.operation,
                    record.key,
                    record.outcome,
                    record.attempts,
                    record.duration_ms
                );
            }
            ReconcileEvent::PhaseCompleted { operation } => {
                println!("--- {} phase finished ---\n", operation);
            }
            ReconcileEvent::CycleCompleted { cycle_id, success } => {
                info!(cycle = %cycle_id, success, "Reconcile cycle completed");
            }
        }
    }

    let report = handle.await.context("Reconcile task failed")?;
    let summary = report.summary();

    println!("--- Summary ---");
    println!(
        "  succeeded: {}  failed: {}  timed out: {}  skipped: {}",
        summary.succeeded, summary.failed, summary.timed_out, summary.skipped
    );
    for record in report.failures() {
        println!("  ✗ {} {}: {}", record.operation, record.key, record.outcome);
    }

    if report.success() {
        println!("\n✓ Apply succeeded!");
    } else {
        println!("\n✗ Apply finished with failures");
    }
    Ok(report.success())
}
