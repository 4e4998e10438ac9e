// Connection templates and the ordered settings merge

use std::collections::HashMap;

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::config::{string_list, value_bool, value_str, value_u16, value_u64, AutomateConfig};
use crate::output::errors::AutomateError;
use crate::topology::hosts::Host;

/// Id of the implicit connection built from the flat `connections` fields
pub const DEFAULT_CONNECTION_ID: &str = "_default";

/// A connection template: default transport settings plus a raw host list.
///
/// All fields are optional so templates can be layered; `layered_over`
/// applies the fixed precedence order builtin defaults ← `_default` ←
/// named (`use`) connection ← task-local override, right side winning
/// field by field. `hosts` is replaced as a whole, never merged.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ConnectionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosts: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sudo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup_keys: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_agent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_agent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_local: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_remote: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<Vec<String>>,
    /// Reference to a named connection, consumed during resolution
    #[serde(skip)]
    pub use_id: Option<String>,
}

impl ConnectionConfig {
    /// The builtin base layer every resolved connection starts from
    pub fn builtin_defaults() -> Self {
        ConnectionConfig {
            port: Some(22),
            connect_timeout: Some(60),
            lookup_keys: Some(false),
            allow_agent: Some(false),
            forward_agent: Some(false),
            ..ConnectionConfig::default()
        }
    }

    /// Extract the allowed connection fields from one config mapping
    pub fn from_mapping(id: Option<&str>, entry: &Mapping) -> Self {
        let id = match id {
            Some(id) => Some(id.to_string()),
            None => entry.get("id").and_then(value_str),
        };

        ConnectionConfig {
            name: entry.get("name").and_then(value_str).or_else(|| id.clone()),
            id,
            hosts: entry.get("hosts").and_then(string_list),
            port: entry.get("port").and_then(value_u16),
            user: entry.get("user").and_then(value_str),
            password: entry.get("password").and_then(value_str),
            sudo: entry.get("sudo").and_then(value_str),
            identity: entry.get("identity").and_then(value_str),
            connect_timeout: entry.get("connect_timeout").and_then(value_u64),
            lookup_keys: entry.get("lookup_keys").and_then(value_bool),
            allow_agent: entry.get("allow_agent").and_then(value_bool),
            forward_agent: entry.get("forward_agent").and_then(value_bool),
            forward_local: entry.get("forward_local").and_then(value_str),
            forward_remote: entry.get("forward_remote").and_then(value_str),
            known_hosts: entry.get("known_hosts").and_then(string_list),
            use_id: entry.get("use").and_then(value_str),
        }
    }

    /// Right-biased shallow merge: fields set on `self` win over `base`
    pub fn layered_over(self, base: &ConnectionConfig) -> Self {
        ConnectionConfig {
            id: self.id.or_else(|| base.id.clone()),
            name: self.name.or_else(|| base.name.clone()),
            hosts: self.hosts.or_else(|| base.hosts.clone()),
            port: self.port.or(base.port),
            user: self.user.or_else(|| base.user.clone()),
            password: self.password.or_else(|| base.password.clone()),
            sudo: self.sudo.or_else(|| base.sudo.clone()),
            identity: self.identity.or_else(|| base.identity.clone()),
            connect_timeout: self.connect_timeout.or(base.connect_timeout),
            lookup_keys: self.lookup_keys.or(base.lookup_keys),
            allow_agent: self.allow_agent.or(base.allow_agent),
            forward_agent: self.forward_agent.or(base.forward_agent),
            forward_local: self.forward_local.or_else(|| base.forward_local.clone()),
            forward_remote: self.forward_remote.or_else(|| base.forward_remote.clone()),
            known_hosts: self.known_hosts.or_else(|| base.known_hosts.clone()),
            use_id: self.use_id.or_else(|| base.use_id.clone()),
        }
    }
}

/// The `_default` connection plus the named, reusable templates
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ConnectionSet {
    pub default: ConnectionConfig,
    pub named: HashMap<String, ConnectionConfig>,
}

/// Resolve the `connections` config section: flat fields become `_default`,
/// the nested `connections` map becomes the named templates.
pub fn resolve_connections(config: &AutomateConfig) -> Result<ConnectionSet, AutomateError> {
    let section = config.section_mapping("connections");

    let mut default = ConnectionConfig::from_mapping(Some(DEFAULT_CONNECTION_ID), &section);
    // the default connection never takes a configured display name
    default.name = Some(DEFAULT_CONNECTION_ID.to_string());

    let mut named = HashMap::new();
    if let Some(Value::Mapping(entries)) = section.get("connections") {
        for (key, entry) in entries {
            let Some(id) = value_str(key) else { continue };
            let entry = entry.as_mapping().ok_or_else(|| {
                AutomateError::config(format!(
                    "To define the connection \"{}\" there must be a mapping",
                    id
                ))
            })?;
            named.insert(id.clone(), ConnectionConfig::from_mapping(Some(&id), entry));
        }
    }

    Ok(ConnectionSet { default, named })
}

/// A fully resolved connection: merged settings plus expanded, deduplicated hosts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConnection {
    pub id: String,
    pub name: String,
    pub hosts: Vec<Host>,
    pub settings: ConnectionConfig,
}

impl ResolvedConnection {
    /// Effective port for one of this connection's hosts
    pub fn port_for(&self, host: &Host) -> u16 {
        host.port.or(self.settings.port).unwrap_or(22)
    }

    /// Effective sudo password for one of this connection's hosts
    pub fn sudo_for(&self, host: &Host) -> Option<String> {
        host.sudo.clone().or_else(|| self.settings.sudo.clone())
    }
}
