//! Resource definitions.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Identifies a resource by kind and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{kind}/{name}")]
pub struct ResourceKey {
    pub kind: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// A declared resource, ready to be applied once its body is resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDefinition {
    /// Resource kind (e.g. "datasources").
    pub kind: String,
    /// Resource name, unique within its kind.
    pub name: String,
    /// Body sent on create-or-replace.
    pub body: serde_json::Value,
    /// Upstream resources this one references. Derived by the graph builder.
    #[serde(default)]
    pub depends_on: Vec<ResourceKey>,
}

impl ResourceDefinition {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            body,
            depends_on: Vec::new(),
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.kind, &self.name)
    }
}
