//! Resource definition documents.
//!
//! A document is a JSON object keyed by resource kind; each kind holds a list of
//! entries. An entry is either `{"name": ..., "body": {...}}` or a bare body that
//! carries its own `name`. An optional `dependsOn` list of `"kind/name"` strings
//! declares upstream resources the reference rules cannot see.

use crate::{ConfigError, ConfigResult, Resolver};
use indexmap::IndexMap;
use provisioner_core::{Error, ResourceDefinition, ResourceKey};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;

/// Resource definitions grouped by kind, in document order.
#[derive(Debug, Clone, Default)]
pub struct DefinitionDocument {
    kinds: IndexMap<String, Vec<ResourceDefinition>>,
}

/// Parse a definition document from JSON text.
pub fn parse_definitions(text: &str) -> ConfigResult<DefinitionDocument> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::malformed_json("definition document", &e))?;
    DefinitionDocument::from_value(value)
}

impl DefinitionDocument {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        parse_definitions(&text)
    }

    pub fn from_value(value: Value) -> ConfigResult<Self> {
        let Value::Object(root) = value else {
            return Err(invalid("document root must be an object keyed by kind"));
        };

        let mut seen = HashSet::new();
        let mut kinds = IndexMap::with_capacity(root.len());

        for (kind, entries) in root {
            let Value::Array(entries) = entries else {
                return Err(invalid(format!("'{}' must be a list of definitions", kind)));
            };

            let mut defs = Vec::with_capacity(entries.len());
            for (index, entry) in entries.into_iter().enumerate() {
                let def = parse_entry(&kind, index, entry)?;
                if !seen.insert(def.key()) {
                    return Err(ConfigError::Duplicate(def.key().to_string()));
                }
                defs.push(def);
            }
            kinds.insert(kind, defs);
        }

        Ok(Self { kinds })
    }

    pub fn push(&mut self, def: ResourceDefinition) {
        self.kinds.entry(def.kind.clone()).or_default().push(def);
    }

    /// Kinds in document order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    pub fn of_kind(&self, kind: &str) -> &[ResourceDefinition] {
        self.kinds.get(kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// All definitions, kind by kind in document order.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceDefinition> {
        self.kinds.values().flatten()
    }

    pub fn resources_mut(&mut self) -> impl Iterator<Item = &mut ResourceDefinition> {
        self.kinds.values_mut().flatten()
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&ResourceDefinition> {
        self.of_kind(&key.kind).iter().find(|d| d.name == key.name)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.kinds.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve every name and body. Any unresolved placeholder fails the whole
    /// document, so nothing partially resolved is ever applied.
    pub fn resolve(&self, resolver: &Resolver<'_>) -> ConfigResult<Self> {
        let mut resolved = Self::default();
        let mut seen = HashSet::new();

        for def in self.resources() {
            let name = resolver.resolve_str(&def.name)?;
            let mut body = resolver.resolve_json(&def.body)?;
            prune_nulls(&mut body);

            let out = ResourceDefinition {
                kind: def.kind.clone(),
                name,
                body,
                depends_on: def
                    .depends_on
                    .iter()
                    .map(|k| Ok(ResourceKey::new(&k.kind, resolver.resolve_str(&k.name)?)))
                    .collect::<provisioner_core::Result<_>>()?,
            };
            if !seen.insert(out.key()) {
                return Err(ConfigError::Duplicate(out.key().to_string()));
            }
            resolved.push(out);
        }

        Ok(resolved)
    }

    pub fn to_value(&self) -> Value {
        let mut root = Map::new();
        for (kind, defs) in &self.kinds {
            let entries = defs
                .iter()
                .map(|d| {
                    let mut entry = Map::new();
                    entry.insert("name".into(), Value::String(d.name.clone()));
                    entry.insert("body".into(), d.body.clone());
                    if !d.depends_on.is_empty() {
                        let deps = d
                            .depends_on
                            .iter()
                            .map(|k| Value::String(k.to_string()))
                            .collect();
                        entry.insert("dependsOn".into(), Value::Array(deps));
                    }
                    Value::Object(entry)
                })
                .collect();
            root.insert(kind.clone(), Value::Array(entries));
        }
        Value::Object(root)
    }
}

fn parse_entry(kind: &str, index: usize, entry: Value) -> ConfigResult<ResourceDefinition> {
    let Value::Object(mut entry) = entry else {
        return Err(invalid(format!("{}[{}] must be an object", kind, index)));
    };

    let depends_on = match entry.remove("dependsOn") {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => parse_depends_on(kind, index, value)?,
    };

    let (name, body) = match entry.remove("body") {
        Some(body) => {
            let name = match entry.get("name") {
                Some(name) => name.as_str().map(str::to_string),
                None => body.get("name").and_then(Value::as_str).map(str::to_string),
            };
            (name, body)
        }
        None => {
            let name = entry.get("name").and_then(Value::as_str).map(str::to_string);
            (name, Value::Object(entry))
        }
    };

    let name = name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| invalid(format!("{}[{}] has no string 'name'", kind, index)))?;

    if !body.is_object() {
        return Err(invalid(format!("{}/{}: body must be an object", kind, name)));
    }

    let mut def = ResourceDefinition::new(kind, name, body);
    def.depends_on = depends_on;
    Ok(def)
}

fn parse_depends_on(kind: &str, index: usize, value: Value) -> ConfigResult<Vec<ResourceKey>> {
    let Value::Array(items) = value else {
        return Err(invalid(format!("{}[{}].dependsOn must be a list", kind, index)));
    };

    items
        .iter()
        .map(|item| {
            item.as_str()
                .and_then(|s| s.split_once('/'))
                .filter(|(k, n)| !k.is_empty() && !n.is_empty())
                .map(|(k, n)| ResourceKey::new(k, n))
                .ok_or_else(|| {
                    ConfigError::InvalidReference(format!(
                        "{}[{}].dependsOn entry {} is not 'kind/name'",
                        kind, index, item
                    ))
                })
        })
        .collect()
}

/// Drop top-level fields whose value is `null`.
pub fn prune_nulls(body: &mut Value) {
    if let Value::Object(map) = body {
        map.retain(|_, v| !v.is_null());
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Engine(Error::InvalidDefinition(message.into()))
}
