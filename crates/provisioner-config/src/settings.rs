//! Engine settings (`provisioner.kdl`).
//!
//! ```kdl
//! label "infra"
//! match-attribute "canonical_name"
//! mode "strict"
//! max-depth 10
//! concurrency 2
//! timeout-secs 600
//! retry attempts=3 backoff="exponential" base-ms=500 max-ms=20000
//! store-retry attempts=3 backoff="fixed" base-ms=20000
//! remote endpoint-key="SEARCH_SERVICE_QUERY_ENDPOINT" api-version-key="SEARCH_API_VERSION"
//! reference "indexers" field="dataSourceName" upstream="datasources"
//! ```
//!
//! Every node is optional. Any `reference` node replaces the default rule set.

use crate::graph::default_rules;
use crate::{ConfigError, ConfigResult, ReferenceRule, ResolveOptions};
use kdl::{KdlDocument, KdlNode};
use provisioner_core::{Backoff, RetryPolicy};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Settings passed explicitly to every engine component.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Config store scope label.
    pub label: String,
    pub resolve: ResolveOptions,
    /// Upper bound on concurrent remote operations.
    pub concurrency: usize,
    /// Per-operation timeout.
    pub timeout: Duration,
    /// Retry policy for remote calls.
    pub retry: RetryPolicy,
    /// Retry policy for config store calls.
    pub store_retry: RetryPolicy,
    pub remote: RemoteSettings,
    pub rules: Vec<ReferenceRule>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            label: "infra".to_string(),
            resolve: ResolveOptions::default(),
            concurrency: 2,
            timeout: Duration::from_secs(600),
            retry: RetryPolicy::default(),
            store_retry: RetryPolicy::fixed(3, Duration::from_secs(20)),
            remote: RemoteSettings::default(),
            rules: default_rules(),
        }
    }
}

/// Where the remote client finds its endpoint in the config store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub endpoint_key: String,
    pub api_version_key: String,
    /// Used when the store has no API version.
    pub default_api_version: Option<String>,
    pub request_timeout: Duration,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            endpoint_key: "SEARCH_SERVICE_QUERY_ENDPOINT".to_string(),
            api_version_key: "SEARCH_API_VERSION".to_string(),
            default_api_version: None,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Load settings from a file. A missing file yields the defaults.
pub fn load_settings(path: &Path) -> ConfigResult<EngineSettings> {
    if !path.exists() {
        debug!(path = %path.display(), "No settings file, using defaults");
        return Ok(EngineSettings::default());
    }
    let text = std::fs::read_to_string(path)?;
    parse_settings(&text)
}

/// Parse engine settings from KDL text.
pub fn parse_settings(kdl: &str) -> ConfigResult<EngineSettings> {
    let doc: KdlDocument = kdl.parse()?;

    let mut settings = EngineSettings::default();
    let mut rules = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "label" => {
                settings.label = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("label".to_string()))?;
            }
            "match-attribute" => {
                settings.resolve.match_attribute = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("match-attribute".to_string()))?;
            }
            "mode" => {
                let mode = get_first_string_arg(node).unwrap_or_default();
                settings.resolve.mode = mode.parse().map_err(|message| ConfigError::InvalidValue {
                    field: "mode".to_string(),
                    message,
                })?;
            }
            "max-depth" => {
                settings.resolve.max_depth = get_count_arg(node, "max-depth")? as usize;
            }
            "concurrency" => {
                let concurrency = get_count_arg(node, "concurrency")?;
                if concurrency == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "concurrency".to_string(),
                        message: "must be at least 1".to_string(),
                    });
                }
                settings.concurrency = concurrency as usize;
            }
            "timeout-secs" => {
                settings.timeout = Duration::from_secs(get_count_arg(node, "timeout-secs")?);
            }
            "retry" => {
                settings.retry = parse_retry(node, &settings.retry)?;
            }
            "store-retry" => {
                settings.store_retry = parse_retry(node, &settings.store_retry)?;
            }
            "remote" => {
                parse_remote(node, &mut settings.remote)?;
            }
            "reference" => {
                rules.push(parse_reference(node)?);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if !rules.is_empty() {
        settings.rules = rules;
    }

    Ok(settings)
}

fn parse_retry(node: &KdlNode, current: &RetryPolicy) -> ConfigResult<RetryPolicy> {
    let field = node.name().value();

    let max_attempts = match get_int_prop(node, "attempts") {
        Some(n) if n >= 1 => n as u32,
        Some(_) => {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.attempts", field),
                message: "must be at least 1".to_string(),
            });
        }
        None => current.max_attempts,
    };

    let (current_base, current_max) = match current.backoff {
        Backoff::Fixed(d) => (d, d),
        Backoff::Exponential { base, max } => (base, max),
    };
    let base = get_int_prop(node, "base-ms")
        .map(|ms| Duration::from_millis(ms.max(0) as u64))
        .unwrap_or(current_base);
    let max = get_int_prop(node, "max-ms")
        .map(|ms| Duration::from_millis(ms.max(0) as u64))
        .unwrap_or(current_max);

    let backoff = match get_string_prop(node, "backoff").as_deref() {
        None => match current.backoff {
            Backoff::Fixed(_) => Backoff::Fixed(base),
            Backoff::Exponential { .. } => Backoff::Exponential { base, max },
        },
        Some("fixed") => Backoff::Fixed(base),
        Some("exponential") => Backoff::Exponential { base, max },
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.backoff", field),
                message: format!("unknown backoff: {}", other),
            });
        }
    };

    Ok(RetryPolicy {
        max_attempts,
        backoff,
    })
}

fn parse_remote(node: &KdlNode, remote: &mut RemoteSettings) -> ConfigResult<()> {
    if let Some(key) = get_string_prop(node, "endpoint-key") {
        remote.endpoint_key = key;
    }
    if let Some(key) = get_string_prop(node, "api-version-key") {
        remote.api_version_key = key;
    }
    if let Some(version) = get_string_prop(node, "api-version") {
        remote.default_api_version = Some(version);
    }
    if let Some(secs) = get_int_prop(node, "timeout-secs") {
        if secs <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "remote.timeout-secs".to_string(),
                message: "must be positive".to_string(),
            });
        }
        remote.request_timeout = Duration::from_secs(secs as u64);
    }
    Ok(())
}

fn parse_reference(node: &KdlNode) -> ConfigResult<ReferenceRule> {
    let kind = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("reference kind".to_string()))?;
    let field = get_string_prop(node, "field")
        .ok_or_else(|| ConfigError::MissingField(format!("reference '{}' field", kind)))?;
    let upstream = get_string_prop(node, "upstream")
        .ok_or_else(|| ConfigError::MissingField(format!("reference '{}' upstream", kind)))?;
    Ok(ReferenceRule::new(kind, field, upstream))
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_int_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

fn get_count_arg(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    match get_first_int_arg(node) {
        Some(n) if n >= 0 => u64::try_from(n).map_err(|_| ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("{} is too large", n),
        }),
        Some(n) => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("{} is negative", n),
        }),
        None => Err(ConfigError::MissingField(field.to_string())),
    }
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_int_prop(node: &KdlNode, name: &str) -> Option<i64> {
    node.get(name)
        .and_then(|v| v.as_integer())
        .and_then(|n| i64::try_from(n).ok())
}
