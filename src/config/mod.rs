// YAML configuration loading for Flotilla

use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::output::errors::AutomateError;

/// Name of the configuration section all automation settings live under
pub const CONFIG_SECTION: &str = "automate";

/// The parsed `automate:` configuration section.
///
/// Holds the raw YAML mapping; the topology and task resolvers walk it with
/// get-with-fallback semantics, so absent sections behave like empty ones.
#[derive(Debug, Clone, Default)]
pub struct AutomateConfig {
    root: Mapping,
}

impl AutomateConfig {
    pub fn new() -> Self {
        AutomateConfig::default()
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, AutomateError> {
        let content = std::fs::read_to_string(path).map_err(|e| AutomateError::Io {
            message: format!("Failed to read config file: {}", e),
            path: Some(path.to_path_buf()),
        })?;

        Self::parse_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn parse_str(content: &str) -> Result<Self, AutomateError> {
        let doc: Value = serde_yaml::from_str(content).map_err(|e| {
            AutomateError::config_with_hint(
                format!("Invalid config YAML: {}", e),
                "Check the configuration file syntax",
            )
        })?;

        match doc {
            Value::Null => Ok(AutomateConfig::new()),
            Value::Mapping(mut map) => match map.remove(CONFIG_SECTION) {
                None => Ok(AutomateConfig::new()),
                Some(section) => Self::from_value(section),
            },
            _ => Err(AutomateError::config_with_hint(
                "Config must be a YAML mapping",
                format!("Start with an \"{}:\" section", CONFIG_SECTION),
            )),
        }
    }

    /// Build a config directly from the `automate:` section value
    pub fn from_value(section: Value) -> Result<Self, AutomateError> {
        match section {
            Value::Null => Ok(AutomateConfig::new()),
            Value::Mapping(root) => Ok(AutomateConfig { root }),
            _ => Err(AutomateError::config(format!(
                "The \"{}\" section must be a mapping",
                CONFIG_SECTION
            ))),
        }
    }

    /// Raw access to one section value
    pub fn section(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// A section as a mapping, falling back to empty when absent
    pub fn section_mapping(&self, key: &str) -> Mapping {
        match self.section(key) {
            Some(Value::Mapping(map)) => map.clone(),
            _ => Mapping::new(),
        }
    }
}

/// Coerce a YAML scalar to a string (strings and numbers qualify)
pub(crate) fn value_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn value_u16(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn value_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn value_bool(value: &Value) -> Option<bool> {
    value.as_bool()
}

/// A string coerces to a one-element list; sequences flatten their scalars
pub(crate) fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Sequence(seq) => Some(seq.iter().filter_map(value_str).collect()),
        _ => None,
    }
}
