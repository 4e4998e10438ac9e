// Host records and host entry parsing

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;

use crate::config::{value_str, value_u16, AutomateConfig};
use crate::output::errors::AutomateError;

/// Reserved identifier denoting the machine the process runs on.
///
/// Allowed as a host *address* (and as a connection host member), never as a
/// configured host or hostgroup id.
pub const LOCAL_ID: &str = "local";

/// A single addressable machine plus its connection overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Host {
    pub id: String,
    pub name: String,
    pub host: String,
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
    pub host_key: Option<String>,
}

impl Host {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Host {
            name: id.clone(),
            host: id.clone(),
            id,
            port: None,
            user: None,
            password: None,
            sudo: None,
            identity: None,
            host_key: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_sudo(mut self, sudo: impl Into<String>) -> Self {
        self.sudo = Some(sudo.into());
        self
    }

    /// The local machine as a host record
    pub fn local() -> Self {
        Host::new(LOCAL_ID)
    }

    /// Check if this host targets the local execution context
    pub fn is_local(&self) -> bool {
        self.host == LOCAL_ID
    }

    /// Build a host from one configured `hosts` entry
    pub(crate) fn from_entry(id: &str, entry: &Value) -> Result<Host, AutomateError> {
        let entry = entry.as_mapping().ok_or_else(|| {
            AutomateError::config(format!(
                "To define the host \"{}\" there must be a mapping",
                id
            ))
        })?;

        let address = entry.get("host").and_then(value_str).ok_or_else(|| {
            AutomateError::config(format!(
                "To define the host \"{}\" there must be at least a \"host\" field",
                id
            ))
        })?;

        let mut host = Host::new(id).with_host(address);
        if let Some(name) = entry.get("name").and_then(value_str) {
            host.name = name;
        }
        host.port = entry.get("port").and_then(value_u16);
        host.user = entry.get("user").and_then(value_str);
        host.password = entry.get("password").and_then(value_str);
        host.sudo = entry.get("sudo").and_then(value_str);
        host.identity = entry.get("identity").and_then(value_str);
        host.host_key = entry.get("host_key").and_then(value_str);

        Ok(host)
    }

    /// Synthesize a host from a `user:password@host:port` member string.
    ///
    /// Every part except the host itself is optional; without a key the host
    /// part doubles as the id.
    pub(crate) fn from_target(key: Option<&str>, target: &str) -> Result<Host, AutomateError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(AutomateError::config(
                "At least a host must be specified to synthesize a host from a string",
            ));
        }

        let (credentials, address) = match target.split_once('@') {
            Some((left, right)) => (left, right),
            None => ("", target),
        };
        let (user, password) = match credentials.split_once(':') {
            Some((user, password)) => (user, password),
            None => (credentials, ""),
        };
        let (address, port) = match address.split_once(':') {
            Some((address, port)) => (address, port),
            None => (address, ""),
        };

        let id = match key {
            Some(key) if !key.is_empty() => key,
            _ => address,
        };
        let mut host = Host::new(id).with_host(address);
        if !port.is_empty() {
            host.port = Some(port.parse().map_err(|_| {
                AutomateError::config(format!("Invalid port \"{}\" in host \"{}\"", port, target))
            })?);
        }
        if !user.is_empty() {
            host.user = Some(user.to_string());
        }
        if !password.is_empty() {
            host.password = Some(password.to_string());
        }

        Ok(host)
    }
}

/// Resolve the configured `hosts` section into host records keyed by id
pub fn resolve_hosts(config: &AutomateConfig) -> Result<HashMap<String, Host>, AutomateError> {
    let mut hosts = HashMap::new();
    let section = config.section_mapping("hosts");

    for (key, entry) in &section {
        let Some(id) = value_str(key) else { continue };

        // The id "local" is reserved; such an entry may only override the
        // sudo password for local execution.
        if id == LOCAL_ID {
            hosts.insert(id, local_from_entry(entry)?);
            continue;
        }

        hosts.insert(id.clone(), Host::from_entry(&id, entry)?);
    }

    Ok(hosts)
}

fn local_from_entry(entry: &Value) -> Result<Host, AutomateError> {
    let entry = entry.as_mapping().cloned().unwrap_or_else(Mapping::new);

    for (field, _) in &entry {
        if value_str(field).as_deref() != Some("sudo") {
            return Err(AutomateError::config_with_hint(
                "The id \"local\" is reserved and not allowed as host",
                "A \"hosts.local\" entry may only carry a \"sudo\" field",
            ));
        }
    }

    let mut host = Host::local();
    host.sudo = entry.get("sudo").and_then(value_str);
    Ok(host)
}
