//! Charm metadata and configuration schema types
//!
//! These are the queriable attributes a bundler supplies at publication time.
//! The store treats them as opaque documents; it never parses charm archives
//! itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One relation endpoint declared by a charm
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Interface the relation speaks (e.g. "http", "mysql")
    pub interface: String,

    /// Whether the relation may be left unsatisfied
    #[serde(default)]
    pub optional: bool,

    /// Maximum number of counterpart units, when bounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Parsed charm metadata
///
/// The relation maps may be empty but are always present.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CharmMeta {
    pub name: String,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub provides: BTreeMap<String, Relation>,

    #[serde(default)]
    pub requires: BTreeMap<String, Relation>,

    #[serde(default)]
    pub peers: BTreeMap<String, Relation>,
}

/// One configurable option exposed by a charm
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOption {
    /// Option value type (e.g. "string", "int", "boolean")
    #[serde(rename = "type")]
    pub kind: String,

    /// Default value, when the charm declares one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    #[serde(default)]
    pub description: String,
}

/// A charm's configuration schema: option name to its declaration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CharmConfig {
    #[serde(default)]
    pub options: BTreeMap<String, ConfigOption>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_default_has_empty_relation_maps() {
        let meta = CharmMeta::default();
        assert!(meta.provides.is_empty());
        assert!(meta.requires.is_empty());
        assert!(meta.peers.is_empty());
    }

    #[test]
    fn test_config_option_default_value() {
        let mut config = CharmConfig::default();
        config.options.insert(
            "title".to_string(),
            ConfigOption {
                kind: "string".to_string(),
                default: Some(serde_json::json!("My Title")),
                description: "Page title".to_string(),
            },
        );
        let opt = &config.options["title"];
        assert_eq!(opt.default, Some(serde_json::json!("My Title")));
    }
}
