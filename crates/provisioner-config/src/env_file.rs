//! Env override files.
//!
//! `KEY=VALUE` lines; blank lines and `#` comments are ignored and surrounding
//! quotes are stripped from values. Overrides win over the config store for
//! single-level placeholders.

use indexmap::IndexMap;
use std::path::Path;

use crate::ConfigResult;

/// Override values in file order.
pub type Overrides = IndexMap<String, String>;

pub fn parse_env(text: &str) -> Overrides {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| {
            let value = v.trim().trim_matches('"').trim_matches('\'');
            (k.trim().to_string(), value.to_string())
        })
        .collect()
}

pub fn load_env_file(path: &Path) -> ConfigResult<Overrides> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_env(&text))
}
