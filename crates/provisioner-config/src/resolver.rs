//! Placeholder resolution against the config store.
//!
//! Supported forms:
//! - `{A}` - override `A` if present, else store key `A` (objects and lists embed as JSON)
//! - `{A.B}` - field `B` of object `A`, or the element of list `A` whose matching
//!   attribute equals `B`
//! - `{A.B.C}` - attribute `C` of the element of list `A` whose matching attribute equals `B`
//!
//! Each component is an identifier, so JSON fragments and other brace text are left alone.
//! A substituted value may expose further placeholders; strings are re-scanned until
//! nothing changes, up to `max_depth` passes.

use provisioner_core::{ConfigStore, ConfigValue, Error, Result};
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;
use tracing::debug;

use crate::env_file::Overrides;

static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{[A-Za-z_][A-Za-z0-9_-]*(?:\.[A-Za-z_][A-Za-z0-9_-]*){0,2}\}").unwrap()
});

/// What to do with a placeholder that cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolveMode {
    /// Fail with [`Error::UnresolvedPlaceholder`].
    #[default]
    Strict,
    /// Leave the literal `{...}` text in place and keep going.
    Lenient,
}

impl std::str::FromStr for ResolveMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(ResolveMode::Strict),
            "lenient" => Ok(ResolveMode::Lenient),
            other => Err(format!("unknown resolve mode: {}", other)),
        }
    }
}

/// Resolution policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Attribute used to find list elements by logical name.
    pub match_attribute: String,
    pub mode: ResolveMode,
    /// Maximum re-scan passes before giving up with [`Error::PlaceholderCycle`].
    pub max_depth: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            match_attribute: "internal_name".to_string(),
            mode: ResolveMode::Strict,
            max_depth: 10,
        }
    }
}

impl ResolveOptions {
    pub fn with_match_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.match_attribute = attribute.into();
        self
    }

    pub fn with_mode(mut self, mode: ResolveMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// List the placeholder tokens (without braces) referenced in a string.
pub fn placeholders_in(text: &str) -> Vec<String> {
    PLACEHOLDER_REGEX
        .find_iter(text)
        .map(|m| strip_braces(m.as_str()).to_string())
        .collect()
}

fn strip_braces(placeholder: &str) -> &str {
    &placeholder[1..placeholder.len() - 1]
}

/// The single token in `text` when the whole string is one placeholder.
fn whole_token(text: &str) -> Option<&str> {
    PLACEHOLDER_REGEX
        .find(text)
        .filter(|m| m.start() == 0 && m.end() == text.len())
        .map(|m| strip_braces(m.as_str()))
}

fn collect_placeholders(value: &serde_json::Value, found: &mut Vec<String>) {
    use serde_json::Value;

    match value {
        Value::String(s) => {
            for token in placeholders_in(s) {
                let placeholder = format!("{{{}}}", token);
                if !found.contains(&placeholder) {
                    found.push(placeholder);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_placeholders(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect_placeholders(v, found)),
        _ => {}
    }
}

/// Resolves placeholders against a store snapshot and optional overrides.
///
/// Resolution is pure: inputs are never mutated and no remote calls are made.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    store: &'a ConfigStore,
    overrides: Option<&'a Overrides>,
    options: &'a ResolveOptions,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a ConfigStore, options: &'a ResolveOptions) -> Self {
        Self {
            store,
            overrides: None,
            options,
        }
    }

    pub fn with_overrides(mut self, overrides: &'a Overrides) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn options(&self) -> &ResolveOptions {
        self.options
    }

    /// Resolve every placeholder in a string. Structured values embed as JSON text.
    pub fn resolve_str(&self, input: &str) -> Result<String> {
        let mut current = input.to_string();
        for _ in 0..=self.options.max_depth {
            let next = self.substitute(&current)?;
            if next == current {
                return Ok(next);
            }
            current = next;
        }
        Err(Error::PlaceholderCycle {
            input: input.to_string(),
            depth: self.options.max_depth,
        })
    }

    /// Resolve placeholders inside a JSON document. Object keys are left untouched.
    pub fn resolve_json(&self, value: &serde_json::Value) -> Result<serde_json::Value> {
        use serde_json::Value;

        match value {
            Value::String(s) => self.resolve_str(s).map(Value::String),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_json(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut resolved = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    resolved.insert(key.clone(), self.resolve_json(item)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    /// Resolve a config value.
    ///
    /// A scalar that is exactly one placeholder resolves to the referenced value
    /// itself, so `{APPS.INGEST}` yields the whole list element as an object.
    pub fn resolve_value(&self, value: &ConfigValue) -> Result<ConfigValue> {
        self.resolve_value_at(value, 0)
    }

    fn resolve_value_at(&self, value: &ConfigValue, depth: usize) -> Result<ConfigValue> {
        if depth > self.options.max_depth {
            return Err(Error::PlaceholderCycle {
                input: value.render(),
                depth: self.options.max_depth,
            });
        }

        match value {
            ConfigValue::Scalar(s) => {
                if let Some(token) = whole_token(s) {
                    match self.lookup(token) {
                        Ok(found @ (ConfigValue::Object(_) | ConfigValue::List(_))) => {
                            return self.resolve_value_at(&found, depth + 1);
                        }
                        Ok(literal @ ConfigValue::Literal(_)) => return Ok(literal),
                        Ok(_) => {}
                        Err(reason) => return self.unresolved(s, token, &reason).map(Into::into),
                    }
                }
                self.resolve_str(s).map(ConfigValue::Scalar)
            }
            ConfigValue::Literal(_) => Ok(value.clone()),
            ConfigValue::List(items) => items
                .iter()
                .map(|item| self.resolve_value_at(item, depth))
                .collect::<Result<Vec<_>>>()
                .map(ConfigValue::List),
            ConfigValue::Object(map) => {
                let mut resolved = indexmap::IndexMap::with_capacity(map.len());
                for (key, item) in map {
                    resolved.insert(key.clone(), self.resolve_value_at(item, depth)?);
                }
                Ok(ConfigValue::Object(resolved))
            }
        }
    }

    /// Placeholders in a JSON document that cannot be resolved, including ones
    /// that only appear once other placeholders have been substituted.
    pub fn unresolved_in(&self, value: &serde_json::Value) -> Vec<String> {
        let lenient_options = self.options.clone().with_mode(ResolveMode::Lenient);
        let lenient = Resolver {
            store: self.store,
            overrides: self.overrides,
            options: &lenient_options,
        };

        let mut found = Vec::new();
        match lenient.resolve_json(value) {
            Ok(resolved) => collect_placeholders(&resolved, &mut found),
            // Nesting too deep to finish; report what the input references.
            Err(_) => collect_placeholders(value, &mut found),
        }
        found
    }

    /// One substitution pass over a string.
    fn substitute(&self, text: &str) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;

        for m in PLACEHOLDER_REGEX.find_iter(text) {
            out.push_str(&text[last..m.start()]);
            let token = strip_braces(m.as_str());
            match self.lookup(token) {
                Ok(value) => out.push_str(&value.render()),
                Err(reason) => out.push_str(&self.unresolved(m.as_str(), token, &reason)?),
            }
            last = m.end();
        }

        out.push_str(&text[last..]);
        Ok(out)
    }

    /// Apply the failure policy to an unresolvable token.
    fn unresolved(&self, literal: &str, token: &str, reason: &str) -> Result<String> {
        match self.options.mode {
            ResolveMode::Strict => Err(Error::UnresolvedPlaceholder(format!(
                "{{{}}}: {}",
                token, reason
            ))),
            ResolveMode::Lenient => {
                debug!(placeholder = %token, reason, "Leaving placeholder unresolved");
                Ok(literal.to_string())
            }
        }
    }

    /// Look up a token. On failure returns why.
    fn lookup(&self, token: &str) -> std::result::Result<ConfigValue, String> {
        let parts: Vec<&str> = token.split('.').collect();
        let attribute = self.options.match_attribute.as_str();

        match parts.as_slice() {
            [key] => {
                if let Some(value) = self.overrides.and_then(|o| o.get(*key)) {
                    return Ok(ConfigValue::Scalar(value.clone()));
                }
                self.store
                    .get(key)
                    .cloned()
                    .ok_or_else(|| format!("key '{}' not found", key))
            }
            [key, field] => {
                let cfg = self.structured(key)?;
                match cfg.as_ref() {
                    ConfigValue::Object(map) => map
                        .get(*field)
                        .cloned()
                        .ok_or_else(|| format!("field '{}' not found in '{}'", field, key)),
                    ConfigValue::List(_) => cfg
                        .find_by(attribute, field)
                        .cloned()
                        .ok_or_else(|| {
                            format!("no element with {}='{}' in '{}'", attribute, field, key)
                        }),
                    ConfigValue::Scalar(_) | ConfigValue::Literal(_) => {
                        Err(format!("'{}' is neither an object nor a list", key))
                    }
                }
            }
            [key, name, field] => {
                let cfg = self.structured(key)?;
                if cfg.as_list().is_none() {
                    return Err(format!("'{}' is not a list", key));
                }
                let elem = cfg.find_by(attribute, name).ok_or_else(|| {
                    format!("no element with {}='{}' in '{}'", attribute, name, key)
                })?;
                elem.get(field)
                    .cloned()
                    .ok_or_else(|| format!("attribute '{}' not found on element '{}'", field, name))
            }
            _ => Err("unsupported placeholder form".to_string()),
        }
    }

    fn structured(&self, key: &str) -> std::result::Result<Cow<'a, ConfigValue>, String> {
        self.store
            .get(key)
            .map(ConfigValue::structured)
            .ok_or_else(|| format!("key '{}' not found", key))
    }
}
