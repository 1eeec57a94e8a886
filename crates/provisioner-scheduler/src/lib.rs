//! Dependency-ordered reconciliation for the provisioner engine.
//!
//! A [`Plan`] holds fully resolved resources grouped into dependency levels.
//! The [`Reconciler`] tears them down most-dependent first, recreates them in
//! forward order and reports a per-resource outcome.

pub mod plan;
pub mod reconciler;
pub mod report;

pub use plan::Plan;
pub use reconciler::{ReconcileEvent, Reconciler};
pub use report::{Operation, OperationRecord, Outcome, ReconcileReport, Summary};
