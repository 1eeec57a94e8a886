//! Error types for the provisioner engine.

use thiserror::Error;

use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing required configuration key: {0}")]
    MissingConfigKey(String),

    #[error("malformed JSON in {context}: {message}")]
    MalformedJson { context: String, message: String },

    #[error("unresolved placeholder: {0}")]
    UnresolvedPlaceholder(String),

    #[error("placeholder nesting exceeded depth {depth} while resolving '{input}'")]
    PlaceholderCycle { input: String, depth: usize },

    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("config store error: {0}")]
    Store(String),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors that must abort a run before any mutating remote call is issued.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::MissingConfigKey(_)
                | Error::MalformedJson { .. }
                | Error::UnresolvedPlaceholder(_)
                | Error::PlaceholderCycle { .. }
                | Error::InvalidDefinition(_)
        )
    }

    pub fn malformed_json(context: impl Into<String>, err: &serde_json::Error) -> Self {
        Error::MalformedJson {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
