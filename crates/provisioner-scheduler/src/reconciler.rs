//! Reconciler - applies a plan in dependency order.
//!
//! Each cycle has two phases:
//! 1. Teardown, most-dependent level first. A delete that finds nothing is a success.
//!    A resource whose dependent is still present is not deleted; the create phase
//!    replaces it in place.
//! 2. Create-or-replace, level 0 first. A resource whose dependency failed is skipped.
//!
//! Within a level, operations run concurrently up to the configured bound. The next
//! level starts only once the current one has fully completed.

use futures::stream::{self, StreamExt};
use provisioner_config::EngineSettings;
use provisioner_core::{CycleId, RemoteClient, RemoteError, ResourceKey, RetryPolicy, retry};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::plan::Plan;
use crate::report::{Operation, OperationRecord, Outcome, ReconcileReport};

/// Event emitted during a reconcile cycle.
#[derive(Debug, Clone)]
pub enum ReconcileEvent {
    OperationStarted {
        key: ResourceKey,
        operation: Operation,
    },
    OperationCompleted {
        record: OperationRecord,
    },
    PhaseCompleted {
        operation: Operation,
    },
    CycleCompleted {
        cycle_id: CycleId,
        success: bool,
    },
}

type Events<'a> = Option<&'a mpsc::Sender<ReconcileEvent>>;

/// Applies plans against a remote client.
#[derive(Clone)]
pub struct Reconciler {
    client: Arc<dyn RemoteClient>,
    concurrency: usize,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        Self {
            client,
            concurrency: 2,
            timeout: Duration::from_secs(600),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_settings(client: Arc<dyn RemoteClient>, settings: &EngineSettings) -> Self {
        Self::new(client)
            .with_concurrency(settings.concurrency)
            .with_timeout(settings.timeout)
            .with_retry(settings.retry.clone())
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Per-operation timeout, covering all retries of that operation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run a cycle in the background, returning a channel of events and a handle
    /// to the final report.
    pub fn execute(
        &self,
        plan: Plan,
    ) -> (
        mpsc::Receiver<ReconcileEvent>,
        tokio::task::JoinHandle<ReconcileReport>,
    ) {
        let (tx, rx) = mpsc::channel(100);
        let reconciler = self.clone();

        let handle = tokio::spawn(async move { reconciler.run(&plan, Some(&tx)).await });

        (rx, handle)
    }

    /// Run a cycle to completion.
    pub async fn reconcile(&self, plan: &Plan) -> ReconcileReport {
        self.run(plan, None).await
    }

    async fn run(&self, plan: &Plan, events: Events<'_>) -> ReconcileReport {
        let mut report = ReconcileReport::new(CycleId::new());
        info!(
            cycle = %report.cycle_id,
            client = self.client.name(),
            resources = plan.len(),
            levels = plan.levels().len(),
            concurrency = self.concurrency,
            "Starting reconcile cycle"
        );

        // Teardown: a resource may only go once all of its dependents are gone.
        let mut gone: HashMap<ResourceKey, bool> = HashMap::new();
        for level in plan.levels().iter().rev() {
            let mut runnable = Vec::new();
            for key in level {
                let blocking: Vec<String> = plan
                    .graph()
                    .dependents_of(key)
                    .filter(|dep| !gone.get(*dep).copied().unwrap_or(false))
                    .map(ToString::to_string)
                    .collect();

                if blocking.is_empty() {
                    runnable.push(key.clone());
                } else {
                    info!(resource = %key, ?blocking, "Skipping delete, dependents still present");
                    gone.insert(key.clone(), false);
                    let record = OperationRecord::skipped(
                        key.clone(),
                        Operation::Delete,
                        format!("dependents still present: {}", blocking.join(", ")),
                    );
                    let event = ReconcileEvent::OperationCompleted {
                        record: record.clone(),
                    };
                    emit(events, event).await;
                    report.push(record);
                }
            }

            for record in self.run_level(plan, runnable, Operation::Delete, events).await {
                gone.insert(record.key.clone(), record.outcome.is_success());
                report.push(record);
            }
        }
        emit(
            events,
            ReconcileEvent::PhaseCompleted {
                operation: Operation::Delete,
            },
        )
        .await;

        // Create: a resource may only be created once all of its dependencies exist.
        let mut created: HashMap<ResourceKey, bool> = HashMap::new();
        for level in plan.levels() {
            let mut runnable = Vec::new();
            for key in level {
                let failed_deps: Vec<String> = plan
                    .graph()
                    .dependencies_of(key)
                    .filter(|dep| !created.get(*dep).copied().unwrap_or(false))
                    .map(ToString::to_string)
                    .collect();

                if failed_deps.is_empty() {
                    runnable.push(key.clone());
                } else {
                    info!(
                        resource = %key,
                        ?failed_deps,
                        "Skipping create due to failed dependencies"
                    );
                    created.insert(key.clone(), false);
                    let record = OperationRecord::skipped(
                        key.clone(),
                        Operation::Create,
                        format!("dependencies failed: {}", failed_deps.join(", ")),
                    );
                    let event = ReconcileEvent::OperationCompleted {
                        record: record.clone(),
                    };
                    emit(events, event).await;
                    report.push(record);
                }
            }

            for record in self.run_level(plan, runnable, Operation::Create, events).await {
                created.insert(record.key.clone(), record.outcome.is_success());
                report.push(record);
            }
        }
        emit(
            events,
            ReconcileEvent::PhaseCompleted {
                operation: Operation::Create,
            },
        )
        .await;

        report.finish();
        let success = report.success();
        let summary = report.summary();
        if success {
            info!(
                cycle = %report.cycle_id,
                succeeded = summary.succeeded,
                "Reconcile cycle completed"
            );
        } else {
            warn!(
                cycle = %report.cycle_id,
                succeeded = summary.succeeded,
                failed = summary.failed,
                timed_out = summary.timed_out,
                skipped = summary.skipped,
                "Reconcile cycle completed with failures"
            );
        }
        emit(
            events,
            ReconcileEvent::CycleCompleted {
                cycle_id: report.cycle_id,
                success,
            },
        )
        .await;

        report
    }

    async fn run_level(
        &self,
        plan: &Plan,
        keys: Vec<ResourceKey>,
        operation: Operation,
        events: Events<'_>,
    ) -> Vec<OperationRecord> {
        stream::iter(keys)
            .map(|key| self.run_operation(plan, key, operation, events))
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    async fn run_operation(
        &self,
        plan: &Plan,
        key: ResourceKey,
        operation: Operation,
        events: Events<'_>,
    ) -> OperationRecord {
        emit(
            events,
            ReconcileEvent::OperationStarted {
                key: key.clone(),
                operation,
            },
        )
        .await;

        let started = Instant::now();
        let label = format!("{} {}", operation, key);

        let (outcome, attempts) = match operation {
            Operation::Delete => {
                let (result, attempts) = self
                    .call_remote(&label, || self.client.delete(&key.kind, &key.name))
                    .await;
                (classify(operation, result), attempts)
            }
            Operation::Create => match plan.get(&key) {
                Some(def) => {
                    let (result, attempts) = self
                        .call_remote(&label, || {
                            self.client.create_or_update(&key.kind, &key.name, &def.body)
                        })
                        .await;
                    (classify(operation, result), attempts)
                }
                None => (
                    Outcome::Failed {
                        message: "resource is not part of the plan".to_string(),
                    },
                    0,
                ),
            },
        };

        match &outcome {
            Outcome::Succeeded => {
                info!(resource = %key, %operation, attempts, "Operation succeeded")
            }
            Outcome::AlreadyAbsent => {
                info!(resource = %key, %operation, "Resource already absent")
            }
            Outcome::TimedOut => error!(
                resource = %key,
                %operation,
                timeout_secs = self.timeout.as_secs(),
                "Operation timed out"
            ),
            other => error!(
                resource = %key,
                %operation,
                attempts,
                outcome = %other,
                "Operation failed"
            ),
        }

        let record = OperationRecord {
            key,
            operation,
            outcome,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        emit(
            events,
            ReconcileEvent::OperationCompleted {
                record: record.clone(),
            },
        )
        .await;
        record
    }

    /// Retry a remote call under the per-operation timeout. `None` means it timed out.
    async fn call_remote<T, F, Fut>(
        &self,
        label: &str,
        mut call: F,
    ) -> (Option<Result<T, RemoteError>>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let calls = AtomicU32::new(0);
        let attempts = retry(&self.retry, label, || {
            calls.fetch_add(1, Ordering::Relaxed);
            call()
        });
        let result = timeout(self.timeout, attempts)
            .await
            .ok()
            .map(|retried| retried.into_result());
        (result, calls.load(Ordering::Relaxed))
    }
}

fn classify<T>(operation: Operation, result: Option<Result<T, RemoteError>>) -> Outcome {
    match result {
        None => Outcome::TimedOut,
        Some(Ok(_)) => Outcome::Succeeded,
        Some(Err(e)) if e.is_not_found() && operation == Operation::Delete => {
            Outcome::AlreadyAbsent
        }
        Some(Err(e)) => Outcome::Failed {
            message: e.to_string(),
        },
    }
}

async fn emit(events: Events<'_>, event: ReconcileEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("client", &self.client.name())
            .field("concurrency", &self.concurrency)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use provisioner_config::{default_rules, parse_definitions};
    use serde_json::Value;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    fn key(kind: &str, name: &str) -> ResourceKey {
        ResourceKey::new(kind, name)
    }

    /// In-memory remote API recording every call.
    #[derive(Default)]
    struct MockRemote {
        existing: Mutex<HashSet<ResourceKey>>,
        calls: Mutex<Vec<String>>,
        reject_create: HashSet<ResourceKey>,
        reject_delete: HashSet<ResourceKey>,
        /// Remaining transient failures per resource.
        flaky: Mutex<HashMap<ResourceKey, u32>>,
        slow: HashSet<ResourceKey>,
        in_flight: AtomicU32,
        max_in_flight: AtomicU32,
    }

    impl MockRemote {
        fn with_existing(keys: &[ResourceKey]) -> Self {
            Self {
                existing: Mutex::new(keys.iter().cloned().collect()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        async fn enter(&self, call: String, key: &ResourceKey) -> Result<(), RemoteError> {
            self.calls.lock().unwrap().push(call);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = if self.slow.contains(key) {
                Duration::from_secs(3600)
            } else {
                Duration::from_millis(10)
            };
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut flaky = self.flaky.lock().unwrap();
            if let Some(remaining) = flaky.get_mut(key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(RemoteError::from_status(503, "busy"));
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteClient for MockRemote {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn get(&self, kind: &str, name: &str) -> Result<Value, RemoteError> {
            let key = key(kind, name);
            if self.existing.lock().unwrap().contains(&key) {
                Ok(Value::Null)
            } else {
                Err(RemoteError::NotFound(key.to_string()))
            }
        }

        async fn create_or_update(
            &self,
            kind: &str,
            name: &str,
            body: &Value,
        ) -> Result<Value, RemoteError> {
            let key = key(kind, name);
            self.enter(format!("create {}", key), &key).await?;
            if self.reject_create.contains(&key) {
                return Err(RemoteError::from_status(400, "invalid body"));
            }
            self.existing.lock().unwrap().insert(key);
            Ok(body.clone())
        }

        async fn delete(&self, kind: &str, name: &str) -> Result<(), RemoteError> {
            let key = key(kind, name);
            self.enter(format!("delete {}", key), &key).await?;
            if self.reject_delete.contains(&key) {
                return Err(RemoteError::from_status(409, "in use"));
            }
            if self.existing.lock().unwrap().remove(&key) {
                Ok(())
            } else {
                Err(RemoteError::NotFound(key.to_string()))
            }
        }
    }

    fn search_plan() -> Plan {
        let doc = parse_definitions(
            r#"{
                "datasources": [{"name": "ds1", "type": "azureblob"}],
                "indexers": [{"name": "ix1", "dataSourceName": "ds1"}]
            }"#,
        )
        .unwrap();
        Plan::new(doc, &default_rules()).unwrap()
    }

    fn reconciler(remote: &Arc<MockRemote>) -> Reconciler {
        Reconciler::new(remote.clone()).with_retry(RetryPolicy::fixed(3, Duration::from_secs(1)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_then_recreate_order() {
        let remote = Arc::new(MockRemote::with_existing(&[
            key("datasources", "ds1"),
            key("indexers", "ix1"),
        ]));
        let report = reconciler(&remote).reconcile(&search_plan()).await;

        assert!(report.success());
        assert_eq!(
            remote.calls(),
            vec![
                "delete indexers/ix1",
                "delete datasources/ds1",
                "create datasources/ds1",
                "create indexers/ix1",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reapply_is_idempotent() {
        let remote = Arc::new(MockRemote::default());
        let plan = search_plan();

        let first = reconciler(&remote).reconcile(&plan).await;
        assert!(first.success());
        assert_eq!(
            first.outcome(&key("indexers", "ix1"), Operation::Delete),
            Some(&Outcome::AlreadyAbsent)
        );

        let second = reconciler(&remote).reconcile(&plan).await;
        assert!(second.success());
        assert_eq!(second.failures().count(), 0);
        assert_eq!(
            second.outcome(&key("indexers", "ix1"), Operation::Delete),
            Some(&Outcome::Succeeded)
        );
        assert_eq!(remote.existing.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_upstream_skips_dependent() {
        let remote = Arc::new(MockRemote {
            reject_create: HashSet::from([key("datasources", "ds1")]),
            ..Default::default()
        });
        let report = reconciler(&remote).reconcile(&search_plan()).await;

        assert!(!report.success());
        assert!(matches!(
            report.outcome(&key("datasources", "ds1"), Operation::Create),
            Some(Outcome::Failed { .. })
        ));
        assert!(matches!(
            report.outcome(&key("indexers", "ix1"), Operation::Create),
            Some(Outcome::Skipped { .. })
        ));
        assert!(!remote.calls().contains(&"create indexers/ix1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_dependent_delete_keeps_upstream() {
        let remote = Arc::new(MockRemote {
            existing: Mutex::new(HashSet::from([
                key("datasources", "ds1"),
                key("indexers", "ix1"),
            ])),
            reject_delete: HashSet::from([key("indexers", "ix1")]),
            ..Default::default()
        });
        let report = reconciler(&remote).reconcile(&search_plan()).await;

        assert!(matches!(
            report.outcome(&key("datasources", "ds1"), Operation::Delete),
            Some(Outcome::Skipped { .. })
        ));
        assert!(!remote.calls().contains(&"delete datasources/ds1".to_string()));
        // Both are still replaced in place.
        assert_eq!(
            report.outcome(&key("datasources", "ds1"), Operation::Create),
            Some(&Outcome::Succeeded)
        );
        assert_eq!(
            report.outcome(&key("indexers", "ix1"), Operation::Create),
            Some(&Outcome::Succeeded)
        );
        assert_eq!(report.summary().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated() {
        let doc = parse_definitions(
            r#"{"indexes": [{"name": "a"}, {"name": "b"}, {"name": "c"}]}"#,
        )
        .unwrap();
        let plan = Plan::new(doc, &[]).unwrap();
        let remote = Arc::new(MockRemote {
            reject_create: HashSet::from([key("indexes", "b")]),
            ..Default::default()
        });
        let report = reconciler(&remote).reconcile(&plan).await;

        assert_eq!(report.summary().failed, 1);
        assert_eq!(
            report.outcome(&key("indexes", "a"), Operation::Create),
            Some(&Outcome::Succeeded)
        );
        assert_eq!(
            report.outcome(&key("indexes", "c"), Operation::Create),
            Some(&Outcome::Succeeded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let remote = Arc::new(MockRemote {
            flaky: Mutex::new(HashMap::from([(key("datasources", "ds1"), 2)])),
            ..Default::default()
        });
        let report = reconciler(&remote).reconcile(&search_plan()).await;

        // Two failed deletes, then NotFound on the third attempt.
        let delete = report
            .operations
            .iter()
            .find(|r| r.key == key("datasources", "ds1") && r.operation == Operation::Delete)
            .unwrap();
        assert_eq!(delete.attempts, 3);
        assert_eq!(delete.outcome, Outcome::AlreadyAbsent);
        assert!(report.success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_cancel_siblings() {
        let doc = parse_definitions(r#"{"indexes": [{"name": "slow"}, {"name": "fast"}]}"#)
            .unwrap();
        let plan = Plan::new(doc, &[]).unwrap();
        let remote = Arc::new(MockRemote {
            slow: HashSet::from([key("indexes", "slow")]),
            ..Default::default()
        });
        let report = reconciler(&remote)
            .with_timeout(Duration::from_secs(600))
            .reconcile(&plan)
            .await;

        assert_eq!(
            report.outcome(&key("indexes", "slow"), Operation::Delete),
            Some(&Outcome::TimedOut)
        );
        assert_eq!(
            report.outcome(&key("indexes", "fast"), Operation::Delete),
            Some(&Outcome::AlreadyAbsent)
        );
        assert_eq!(
            report.outcome(&key("indexes", "fast"), Operation::Create),
            Some(&Outcome::Succeeded)
        );
        assert_eq!(report.summary().timed_out, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let doc = parse_definitions(
            r#"{"indexes": [
                {"name": "a"}, {"name": "b"}, {"name": "c"}, {"name": "d"}, {"name": "e"}
            ]}"#,
        )
        .unwrap();
        let plan = Plan::new(doc, &[]).unwrap();
        let remote = Arc::new(MockRemote::default());
        let report = reconciler(&remote)
            .with_concurrency(2)
            .reconcile(&plan)
            .await;

        assert!(report.success());
        assert_eq!(remote.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependency_safety_in_operation_log() {
        let doc = parse_definitions(
            r#"{
                "datasources": [{"name": "ds1"}, {"name": "ds2"}],
                "indexes": [{"name": "idx"}],
                "skillsets": [{"name": "sk"}],
                "indexers": [
                    {
                        "name": "ix1",
                        "dataSourceName": "ds1",
                        "targetIndexName": "idx",
                        "skillsetName": "sk"
                    },
                    {"name": "ix2", "dataSourceName": "ds2", "targetIndexName": "idx"}
                ]
            }"#,
        )
        .unwrap();
        let plan = Plan::new(doc, &default_rules()).unwrap();
        let remote = Arc::new(MockRemote::default());
        let report = reconciler(&remote)
            .with_concurrency(3)
            .reconcile(&plan)
            .await;
        assert!(report.success());

        for def in plan.resources() {
            for dep in &def.depends_on {
                let pos = |k: &ResourceKey, op| report.position(k, op).unwrap();
                assert!(pos(&def.key(), Operation::Delete) < pos(dep, Operation::Delete));
                assert!(pos(dep, Operation::Create) < pos(&def.key(), Operation::Create));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_streams_events() {
        let remote = Arc::new(MockRemote::default());
        let (mut rx, handle) = reconciler(&remote).execute(search_plan());

        let mut completed = 0;
        let mut cycle_success = None;
        while let Some(event) = rx.recv().await {
            match event {
                ReconcileEvent::OperationCompleted { .. } => completed += 1,
                ReconcileEvent::CycleCompleted { success, .. } => cycle_success = Some(success),
                _ => {}
            }
        }

        let report = handle.await.unwrap();
        assert_eq!(completed, 4);
        assert_eq!(cycle_success, Some(true));
        assert_eq!(report.operations.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_plans_every_call() {
        use provisioner_remote::{DryRunClient, PlannedCall};

        let client = Arc::new(DryRunClient::new());
        let report = Reconciler::new(client.clone())
            .reconcile(&search_plan())
            .await;
        assert!(report.success());
        assert_eq!(
            client.calls(),
            vec![
                PlannedCall::Delete(key("indexers", "ix1")),
                PlannedCall::Delete(key("datasources", "ds1")),
                PlannedCall::CreateOrUpdate(key("datasources", "ds1")),
                PlannedCall::CreateOrUpdate(key("indexers", "ix1")),
            ]
        );
    }
}
