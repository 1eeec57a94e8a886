//! Configuration values.
//!
//! Every stored setting is a string. Settings whose trimmed text starts with `{` or `[`
//! and parses as JSON are kept as structured values; everything else (including JSON that
//! fails to parse) stays a scalar. Parsing never fails.
//!
//! JSON leaves that are not strings (numbers, booleans, `null`) keep their JSON type, so
//! structures serialize back exactly as stored. Embedded in text they render as their
//! JSON text, except `null`, which renders as the empty string.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A configuration value loaded from the config store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Scalar(String),
    /// A number, boolean or `null` inside a structured value.
    Literal(serde_json::Value),
    Object(IndexMap<String, ConfigValue>),
    List(Vec<ConfigValue>),
}

impl ConfigValue {
    /// Parse a raw stored setting.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(raw) {
                return Self::from_json(json);
            }
        }
        ConfigValue::Scalar(raw.to_string())
    }

    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::String(s) => ConfigValue::Scalar(s),
            literal @ (Value::Number(_) | Value::Bool(_) | Value::Null) => {
                ConfigValue::Literal(literal)
            }
            Value::Array(items) => {
                ConfigValue::List(items.into_iter().map(Self::from_json).collect())
            }
            Value::Object(map) => ConfigValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            ConfigValue::Scalar(s) => Value::String(s.clone()),
            ConfigValue::Literal(value) => value.clone(),
            ConfigValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            ConfigValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Compact JSON text of this value.
    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    /// Text used when the value is embedded in a string: scalars as-is,
    /// everything else as JSON. `null` renders empty.
    pub fn render(&self) -> String {
        match self {
            ConfigValue::Scalar(s) => s.clone(),
            ConfigValue::Literal(serde_json::Value::Null) => String::new(),
            _ => self.to_json_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, ConfigValue>> {
        match self {
            ConfigValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            ConfigValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Field of an object value.
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// First object element of a list whose `attribute` equals `wanted`.
    pub fn find_by(&self, attribute: &str, wanted: &str) -> Option<&ConfigValue> {
        self.as_list()?.iter().find(|elem| match elem.get(attribute) {
            Some(ConfigValue::Scalar(s)) => s == wanted,
            Some(literal @ ConfigValue::Literal(_)) => literal.render() == wanted,
            _ => false,
        })
    }

    /// A blank scalar or `null` counts as empty; structured values never do.
    pub fn is_empty(&self) -> bool {
        match self {
            ConfigValue::Scalar(s) => s.trim().is_empty(),
            ConfigValue::Literal(value) => value.is_null(),
            _ => false,
        }
    }

    /// The structured form of a scalar that holds JSON text, if any.
    pub fn structured(&self) -> std::borrow::Cow<'_, ConfigValue> {
        match self {
            ConfigValue::Scalar(s) => match Self::parse(s) {
                parsed @ (ConfigValue::Object(_) | ConfigValue::List(_)) => {
                    std::borrow::Cow::Owned(parsed)
                }
                _ => std::borrow::Cow::Borrowed(self),
            },
            _ => std::borrow::Cow::Borrowed(self),
        }
    }
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Scalar(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Scalar(value.to_string())
    }
}

impl From<serde_json::Value> for ConfigValue {
    fn from(value: serde_json::Value) -> Self {
        Self::from_json(value)
    }
}

impl Serialize for ConfigValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ConfigValue::Scalar(s) => serializer.serialize_str(s),
            ConfigValue::Literal(value) => value.serialize(serializer),
            ConfigValue::List(items) => serializer.collect_seq(items),
            ConfigValue::Object(map) => serializer.collect_map(map),
        }
    }
}

impl<'de> Deserialize<'de> for ConfigValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_string_is_scalar() {
        assert_eq!(
            ConfigValue::parse("https://search.example.net"),
            ConfigValue::Scalar("https://search.example.net".to_string())
        );
    }

    #[test]
    fn test_malformed_json_is_kept_as_scalar() {
        let raw = r#"{"name": "broken""#;
        assert_eq!(ConfigValue::parse(raw), ConfigValue::Scalar(raw.to_string()));
    }

    #[test]
    fn test_json_only_sniffed_for_objects_and_lists() {
        // Numbers and quoted strings are valid JSON but stay verbatim.
        assert_eq!(ConfigValue::parse("42"), ConfigValue::Scalar("42".into()));
        assert_eq!(
            ConfigValue::parse(r#""quoted""#),
            ConfigValue::Scalar(r#""quoted""#.into())
        );
    }

    #[test]
    fn test_parse_list_of_objects() {
        let value = ConfigValue::parse(
            r#"[{"canonical_name": "CHAT", "name": "gpt4-dep", "capacity": 40}]"#,
        );
        let elem = value.find_by("canonical_name", "CHAT").unwrap();
        assert_eq!(elem.get("name").and_then(|v| v.as_str()), Some("gpt4-dep"));
        assert_eq!(elem.get("capacity").map(ConfigValue::render), Some("40".into()));
        assert!(value.find_by("canonical_name", "EMBEDDING").is_none());
    }

    #[test]
    fn test_json_text_round_trip() {
        let inputs = [
            r#"{"a": "1", "b": {"c": ["x", "y"]}}"#,
            r#"[{"internal_name": "A", "name": "app-a"}, {"internal_name": "B"}]"#,
            "[]",
        ];
        for raw in inputs {
            let parsed = ConfigValue::parse(raw);
            assert_eq!(ConfigValue::parse(&parsed.to_json_string()), parsed, "{raw}");
        }
    }

    #[test]
    fn test_non_string_leaves_keep_their_type() {
        let raw = r#"{"canonical_name":"CHAT","capacity":40,"enabled":true,"sku":null}"#;
        let value = ConfigValue::parse(raw);

        assert_eq!(value.render(), raw);
        assert_eq!(value.to_json(), serde_json::from_str::<serde_json::Value>(raw).unwrap());
        assert_eq!(value.get("enabled").map(ConfigValue::render), Some("true".into()));
        assert!(value.get("sku").unwrap().is_empty());
        assert_eq!(serde_json::to_string(&value).unwrap(), raw);
    }

    #[test]
    fn test_find_by_matches_numeric_attribute() {
        let value = ConfigValue::parse(r#"[{"id": 7, "name": "seven"}]"#);
        let elem = value.find_by("id", "7").unwrap();
        assert_eq!(elem.get("name").and_then(|v| v.as_str()), Some("seven"));
    }

    #[test]
    fn test_render_embeds_structures_as_json() {
        let value = ConfigValue::parse(r#"{"k": "v"}"#);
        assert_eq!(value.render(), r#"{"k":"v"}"#);
        assert_eq!(ConfigValue::from("plain").render(), "plain");
    }

    #[test]
    fn test_empty_detection() {
        assert!(ConfigValue::from("  ").is_empty());
        assert!(!ConfigValue::from("x").is_empty());
        assert!(!ConfigValue::parse("[]").is_empty());
    }

    #[test]
    fn test_structured_view_of_json_scalar() {
        let scalar = ConfigValue::Scalar(r#"[{"internal_name": "A"}]"#.into());
        assert!(scalar.structured().as_list().is_some());
        let plain = ConfigValue::from("text");
        assert_eq!(plain.structured().as_str(), Some("text"));
    }
}
