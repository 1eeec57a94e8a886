//! Reconcile reports.

use chrono::{DateTime, Utc};
use provisioner_core::{CycleId, ResourceKey};
use serde::Serialize;
use std::fmt;

/// Kind of remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Delete,
    Create,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Delete => write!(f, "delete"),
            Operation::Create => write!(f, "create"),
        }
    }
}

/// Result of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    /// Delete of a resource that did not exist.
    AlreadyAbsent,
    Failed { message: String },
    TimedOut,
    Skipped { reason: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded | Outcome::AlreadyAbsent)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. } | Outcome::TimedOut)
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Failed { message } => Some(message),
            Outcome::Skipped { reason } => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Succeeded => write!(f, "succeeded"),
            Outcome::AlreadyAbsent => write!(f, "already absent"),
            Outcome::Failed { message } => write!(f, "failed: {}", message),
            Outcome::TimedOut => write!(f, "timed out"),
            Outcome::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

/// One entry of the operation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationRecord {
    pub key: ResourceKey,
    pub operation: Operation,
    pub outcome: Outcome,
    /// Remote calls made, including retries.
    pub attempts: u32,
    pub duration_ms: u64,
}

impl OperationRecord {
    pub fn skipped(key: ResourceKey, operation: Operation, reason: impl Into<String>) -> Self {
        Self {
            key,
            operation,
            outcome: Outcome::Skipped {
                reason: reason.into(),
            },
            attempts: 0,
            duration_ms: 0,
        }
    }
}

/// Outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub skipped: usize,
}

/// Everything that happened during one apply cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub cycle_id: CycleId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Operation log, in completion order.
    pub operations: Vec<OperationRecord>,
}

impl ReconcileReport {
    pub fn new(cycle_id: CycleId) -> Self {
        Self {
            cycle_id,
            started_at: Utc::now(),
            finished_at: None,
            operations: Vec::new(),
        }
    }

    pub fn push(&mut self, record: OperationRecord) {
        self.operations.push(record);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// True when every operation succeeded.
    pub fn success(&self) -> bool {
        self.operations.iter().all(|r| r.outcome.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationRecord> {
        self.operations.iter().filter(|r| r.outcome.is_failure())
    }

    pub fn outcome(&self, key: &ResourceKey, operation: Operation) -> Option<&Outcome> {
        self.operations
            .iter()
            .find(|r| &r.key == key && r.operation == operation)
            .map(|r| &r.outcome)
    }

    /// Position of an operation in the log.
    pub fn position(&self, key: &ResourceKey, operation: Operation) -> Option<usize> {
        self.operations
            .iter()
            .position(|r| &r.key == key && r.operation == operation)
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for record in &self.operations {
            match record.outcome {
                Outcome::Succeeded | Outcome::AlreadyAbsent => summary.succeeded += 1,
                Outcome::Failed { .. } => summary.failed += 1,
                Outcome::TimedOut => summary.timed_out += 1,
                Outcome::Skipped { .. } => summary.skipped += 1,
            }
        }
        summary
    }
}
