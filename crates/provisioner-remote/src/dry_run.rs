//! Dry-run remote client.

use async_trait::async_trait;
use provisioner_core::{RemoteClient, RemoteError, ResourceKey};
use serde_json::Value;
use std::sync::Mutex;
use tracing::info;

/// A call the dry-run client would have made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedCall {
    Delete(ResourceKey),
    CreateOrUpdate(ResourceKey),
}

/// Logs intended mutations instead of performing them. Every call succeeds and
/// reads report the resource as absent.
#[derive(Debug, Default)]
pub struct DryRunClient {
    calls: Mutex<Vec<PlannedCall>>,
}

impl DryRunClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls recorded so far, in order.
    pub fn calls(&self) -> Vec<PlannedCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: PlannedCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl RemoteClient for DryRunClient {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn get(&self, kind: &str, name: &str) -> Result<Value, RemoteError> {
        Err(RemoteError::NotFound(format!("{}/{} (dry run)", kind, name)))
    }

    async fn create_or_update(
        &self,
        kind: &str,
        name: &str,
        body: &Value,
    ) -> Result<Value, RemoteError> {
        info!(kind, name, body = %body, "Would create or update");
        self.record(PlannedCall::CreateOrUpdate(ResourceKey::new(kind, name)));
        Ok(body.clone())
    }

    async fn delete(&self, kind: &str, name: &str) -> Result<(), RemoteError> {
        info!(kind, name, "Would delete");
        self.record(PlannedCall::Delete(ResourceKey::new(kind, name)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let client = DryRunClient::new();
        client.delete("indexers", "ix1").await.unwrap();
        let body = serde_json::json!({"name": "ix1"});
        assert_eq!(
            client.create_or_update("indexers", "ix1", &body).await.unwrap(),
            body
        );
        assert!(client.get("indexers", "ix1").await.unwrap_err().is_not_found());

        assert_eq!(
            client.calls(),
            vec![
                PlannedCall::Delete(ResourceKey::new("indexers", "ix1")),
                PlannedCall::CreateOrUpdate(ResourceKey::new("indexers", "ix1")),
            ]
        );
    }
}
