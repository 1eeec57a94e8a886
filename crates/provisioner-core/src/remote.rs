//! Remote API client trait and error classification.
//!
//! Remote clients manage resources on an external management API, addressed by
//! resource kind (e.g. "datasources") and name.

use async_trait::async_trait;
use thiserror::Error;

use crate::retry::Retryable;

/// Failure returned by a remote call, classified by HTTP-like status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The resource does not exist. Deleting it counts as success.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure, 5xx, throttling or an expired token. Worth retrying.
    #[error("transient failure{}: {message}", status_suffix(.status))]
    Transient {
        status: Option<u16>,
        message: String,
    },

    /// Any other 4xx. Retrying will not help.
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl RemoteError {
    /// Classify a failed response by status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => RemoteError::NotFound(message),
            401 | 408 | 429 | 500..=599 => RemoteError::Transient {
                status: Some(status),
                message,
            },
            _ => RemoteError::Rejected { status, message },
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        RemoteError::Transient {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

impl Retryable for RemoteError {
    fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient { .. })
    }
}

/// Trait for remote management API clients.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Name of this client, for logs.
    fn name(&self) -> &'static str;

    /// Fetch the current body of a resource.
    async fn get(&self, kind: &str, name: &str) -> Result<serde_json::Value, RemoteError>;

    /// Create or replace a resource with the given body.
    async fn create_or_update(
        &self,
        kind: &str,
        name: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, RemoteError>;

    /// Delete a resource. Returns [`RemoteError::NotFound`] when it does not exist.
    async fn delete(&self, kind: &str, name: &str) -> Result<(), RemoteError>;
}
