// Topology resolution: hosts, host groups and connection templates

mod connections;
mod groups;
mod hosts;

pub use connections::*;
pub use groups::*;
pub use hosts::*;

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::config::AutomateConfig;
use crate::output::errors::AutomateError;

/// Resolves raw configuration into hosts, host groups and connections.
///
/// Each section is resolved once on first access and shared read-only for
/// the process lifetime; repeated access returns the identical allocation.
pub struct Topology {
    config: Arc<AutomateConfig>,
    hosts: OnceCell<Arc<HashMap<String, Host>>>,
    hostgroups: OnceCell<Arc<HashMap<String, Vec<Host>>>>,
    connections: OnceCell<Arc<ConnectionSet>>,
}

impl Topology {
    pub fn new(config: Arc<AutomateConfig>) -> Self {
        Topology {
            config,
            hosts: OnceCell::new(),
            hostgroups: OnceCell::new(),
            connections: OnceCell::new(),
        }
    }

    /// The resolved host map, keyed by host id
    pub fn hosts(&self) -> Result<Arc<HashMap<String, Host>>, AutomateError> {
        self.hosts
            .get_or_try_init(|| resolve_hosts(&self.config).map(Arc::new))
            .cloned()
    }

    /// The resolved host groups, each an ordered host list
    pub fn hostgroups(&self) -> Result<Arc<HashMap<String, Vec<Host>>>, AutomateError> {
        let hosts = self.hosts()?;
        self.hostgroups
            .get_or_try_init(|| resolve_hostgroups(&self.config, &hosts).map(Arc::new))
            .cloned()
    }

    /// The `_default` connection and the named connection templates
    pub fn connections(&self) -> Result<Arc<ConnectionSet>, AutomateError> {
        self.connections
            .get_or_try_init(|| resolve_connections(&self.config).map(Arc::new))
            .cloned()
    }

    /// Expand a raw host member list the same way host groups resolve:
    /// host id match, group match (flattened), or a synthesized singleton.
    pub fn expand_members(&self, members: &[String]) -> Result<Vec<Host>, AutomateError> {
        let hosts = self.hosts()?;
        let groups = self.hostgroups()?;

        let mut expanded = Vec::new();
        for member in members {
            if let Some(host) = hosts.get(member) {
                expanded.push(host.clone());
            } else if let Some(group) = groups.get(member) {
                expanded.extend(group.iter().cloned());
            } else {
                expanded.push(Host::from_target(None, member)?);
            }
        }

        Ok(expanded)
    }

    /// Transform a raw connection spec into a fully resolved connection.
    ///
    /// Applies the fixed layering order (builtin defaults ← `_default` ←
    /// `use` reference ← the spec itself), then expands and deduplicates
    /// the host list, first occurrence winning.
    pub fn resolve_connection(
        &self,
        mut spec: ConnectionConfig,
    ) -> Result<ResolvedConnection, AutomateError> {
        let connections = self.connections()?;

        // merge with the referenced named connection if one is used
        let merged = match spec.use_id.take() {
            Some(use_id) => {
                let base = connections.named.get(&use_id).ok_or_else(|| {
                    AutomateError::config(format!(
                        "The connection \"{}\" is not defined",
                        use_id
                    ))
                })?;
                spec.layered_over(base)
            }
            None => spec,
        };

        // references are resolved exactly one level deep; a `use` carried by
        // a base layer is not chased further
        let mut merged = merged
            .layered_over(&connections.default)
            .layered_over(&ConnectionConfig::builtin_defaults());
        merged.use_id = None;

        let members = merged.hosts.clone().ok_or_else(|| {
            AutomateError::config("A connection must resolve at least one host")
        })?;

        // expand, then deduplicate by host id keeping the first occurrence
        let mut hosts = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for host in self.expand_members(&members)? {
            if seen.insert(host.id.clone()) {
                hosts.push(host);
            }
        }

        let id = merged
            .id
            .clone()
            .unwrap_or_else(|| DEFAULT_CONNECTION_ID.to_string());
        let name = merged.name.clone().unwrap_or_else(|| id.clone());

        let mut settings = merged;
        settings.hosts = None;

        Ok(ResolvedConnection {
            id,
            name,
            hosts,
            settings,
        })
    }
}
