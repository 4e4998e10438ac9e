// Host group resolution

use std::collections::HashMap;

use serde_yaml::Value;

use crate::config::{value_str, AutomateConfig};
use crate::output::errors::AutomateError;
use crate::topology::hosts::{Host, LOCAL_ID};

/// Resolve the configured `hostgroups` section into ordered host lists.
///
/// Member lookup order: known host id, already-resolved group (flattened),
/// otherwise a singleton host synthesized from the member string. Groups
/// resolve strictly in configuration order, so a group only sees groups
/// defined before it; forward and self references fall through to host
/// synthesis and cannot recurse. Duplicates are kept here; deduplication
/// happens when a task's connection is compiled.
pub fn resolve_hostgroups(
    config: &AutomateConfig,
    hosts: &HashMap<String, Host>,
) -> Result<HashMap<String, Vec<Host>>, AutomateError> {
    let mut groups: HashMap<String, Vec<Host>> = HashMap::new();
    let section = config.section_mapping("hostgroups");

    for (key, entry) in &section {
        let Some(id) = value_str(key) else { continue };

        if id == LOCAL_ID {
            return Err(AutomateError::config(
                "The id \"local\" is reserved and not allowed as hostgroup",
            ));
        }

        let members = match entry {
            Value::Sequence(members) => members,
            _ => {
                return Err(AutomateError::config(format!(
                    "To create the hostgroup \"{}\" there must be a list of hosts",
                    id
                )))
            }
        };

        let mut expanded = Vec::new();
        for member in members {
            let member = value_str(member).ok_or_else(|| {
                AutomateError::config(format!(
                    "The hostgroup \"{}\" may only list host names, group names or addresses",
                    id
                ))
            })?;

            if let Some(host) = hosts.get(&member) {
                expanded.push(host.clone());
            } else if let Some(group) = groups.get(&member) {
                expanded.extend(group.iter().cloned());
            } else {
                expanded.push(Host::from_target(None, &member)?);
            }
        }

        groups.insert(id, expanded);
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::hosts::resolve_hosts;
    use pretty_assertions::assert_eq;

    fn config(yaml: &str) -> AutomateConfig {
        AutomateConfig::from_value(serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    fn fixture() -> AutomateConfig {
        config(
            r#"
hosts:
  host1: {host: ip_address1, port: 22, user: user1}
  host2: {name: Server host2, host: ip_address2}
  host3: {host: ip_address3}
hostgroups:
  group1: [host1, host2]
  group2: [host3]
  group3: [group1, host3]
  group4: [group1, group2]
  group5: [192.168.0.1, 192.168.0.2]
"#,
        )
    }

    #[test]
    fn test_group_expansion() {
        let config = fixture();
        let hosts = resolve_hosts(&config).unwrap();
        let groups = resolve_hostgroups(&config, &hosts).unwrap();

        let ids = |group: &str| -> Vec<String> {
            groups[group].iter().map(|h| h.id.clone()).collect()
        };

        assert_eq!(ids("group1"), vec!["host1", "host2"]);
        assert_eq!(ids("group2"), vec!["host3"]);
        // nested groups flatten in member order
        assert_eq!(ids("group3"), vec!["host1", "host2", "host3"]);
        assert_eq!(ids("group4"), vec!["host1", "host2", "host3"]);
        // full host records are carried, not just names
        assert_eq!(groups["group3"][0], hosts["host1"]);
    }

    #[test]
    fn test_unknown_members_synthesize_hosts() {
        let config = fixture();
        let hosts = resolve_hosts(&config).unwrap();
        let groups = resolve_hostgroups(&config, &hosts).unwrap();

        let group5 = &groups["group5"];
        assert_eq!(group5.len(), 2);
        assert_eq!(group5[0].id, "192.168.0.1");
        assert_eq!(group5[0].name, "192.168.0.1");
        assert_eq!(group5[0].host, "192.168.0.1");
    }

    #[test]
    fn test_local_group_id_is_fatal() {
        let config = config("hostgroups: {local: [a, b]}");
        assert!(matches!(
            resolve_hostgroups(&config, &HashMap::new()),
            Err(AutomateError::Config { .. })
        ));
    }

    #[test]
    fn test_non_sequence_group_is_fatal() {
        let config = config("hostgroups: {web: host1}");
        assert!(matches!(
            resolve_hostgroups(&config, &HashMap::new()),
            Err(AutomateError::Config { .. })
        ));
    }

    #[test]
    fn test_forward_reference_synthesizes_instead_of_recursing() {
        // "later" is defined after "early", so the member is not yet a group
        // and becomes a singleton host instead.
        let config = config(
            r#"
hostgroups:
  early: [later]
  later: [192.168.0.9]
"#,
        );
        let groups = resolve_hostgroups(&config, &HashMap::new()).unwrap();
        assert_eq!(groups["early"].len(), 1);
        assert_eq!(groups["early"][0].host, "later");
    }
}
