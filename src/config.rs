//! Minimal configuration-category handling.
//!
//! The host hands the plugin a JSON configuration category: a map of named
//! items, each either a bare scalar or an object carrying `value`, `default`
//! and further attributes (the `script` item stores the uploaded file path
//! in its `file` attribute). This module parses just enough of that shape
//! for the delivery plugin; full category management stays on the host side.

use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::error::{DeliveryError, DeliveryResult};

/// Item attribute holding the uploaded script file path.
pub const FILE_ATTRIBUTE: &str = "file";

/// Environment variable naming the host data directory.
pub const DATA_DIR_ENV: &str = "NOTIFY_DATA";

/// A named set of configuration items, as delivered by the host.
#[derive(Debug, Clone)]
pub struct ConfigCategory {
    name: String,
    items: Map<String, Value>,
}

impl ConfigCategory {
    /// Parse a category from its JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Config`] when the payload is not valid JSON
    /// or not a JSON object.
    pub fn from_json(name: &str, payload: &str) -> DeliveryResult<Self> {
        let parsed: Value = serde_json::from_str(payload)
            .map_err(|err| DeliveryError::Config(format!("invalid category JSON: {err}")))?;
        match parsed {
            Value::Object(items) => Ok(Self {
                name: name.to_string(),
                items,
            }),
            other => Err(DeliveryError::Config(format!(
                "category payload must be a JSON object, got {other}"
            ))),
        }
    }

    /// Category name, usually the delivery instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the category defines the named item.
    pub fn item_exists(&self, item: &str) -> bool {
        self.items.contains_key(item)
    }

    /// Item value as text, falling back to the item's default.
    ///
    /// Non-string JSON values (the `config` item is typically a JSON object)
    /// are rendered in their compact JSON form.
    pub fn get_value(&self, item: &str) -> Option<String> {
        match self.items.get(item)? {
            Value::Object(attrs) => attrs
                .get("value")
                .or_else(|| attrs.get("default"))
                .map(value_text),
            other => Some(value_text(other)),
        }
    }

    /// A named attribute of an item, e.g. the `file` attribute of `script`.
    pub fn get_item_attribute(&self, item: &str, attribute: &str) -> Option<String> {
        match self.items.get(item)? {
            Value::Object(attrs) => attrs.get(attribute).map(value_text),
            _ => None,
        }
    }
}

/// Host data directory, taken from [`DATA_DIR_ENV`] with a `data` fallback.
pub fn host_data_dir() -> PathBuf {
    std::env::var(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn category(payload: Value) -> ConfigCategory {
        ConfigCategory::from_json("test", &payload.to_string()).unwrap()
    }

    #[test]
    fn reads_item_values_and_defaults() {
        let cat = category(json!({
            "enable": { "type": "boolean", "default": "false", "value": "true" },
            "script": { "type": "script", "default": "" },
        }));
        assert_eq!(cat.get_value("enable").as_deref(), Some("true"));
        // No value set: fall back to the default
        assert_eq!(cat.get_value("script").as_deref(), Some(""));
        assert_eq!(cat.get_value("missing"), None);
        assert!(cat.item_exists("enable"));
        assert!(!cat.item_exists("missing"));
    }

    #[test]
    fn renders_json_values_as_compact_text() {
        let cat = category(json!({
            "config": { "type": "JSON", "value": { "threshold": 5 } },
        }));
        assert_eq!(cat.get_value("config").as_deref(), Some(r#"{"threshold":5}"#));
    }

    #[test]
    fn reads_file_attribute_of_script_item() {
        let cat = category(json!({
            "script": {
                "type": "script",
                "value": "",
                "file": "/data/scripts/mycat_script_onalert.rhai",
            },
        }));
        assert_eq!(
            cat.get_item_attribute("script", FILE_ATTRIBUTE).as_deref(),
            Some("/data/scripts/mycat_script_onalert.rhai")
        );
        assert_eq!(cat.get_item_attribute("script", "other"), None);
    }

    #[test]
    fn scalar_items_are_read_directly() {
        let cat = category(json!({ "enable": "True" }));
        assert_eq!(cat.get_value("enable").as_deref(), Some("True"));
    }

    #[test]
    fn malformed_payload_is_a_config_error() {
        let err = ConfigCategory::from_json("test", "{not json").unwrap_err();
        assert!(matches!(err, DeliveryError::Config(_)));

        let err = ConfigCategory::from_json("test", "[1, 2]").unwrap_err();
        assert!(matches!(err, DeliveryError::Config(_)));
    }
}
