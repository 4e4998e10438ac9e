// Task compilation: binding configuration to handlers and resolved connections

pub mod builtin;
pub mod registry;

pub use registry::{Kwargs, TaskHandler, TaskRegistry};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_yaml::Mapping;

use crate::config::{string_list, value_str, value_u64, AutomateConfig};
use crate::output::errors::AutomateError;
use crate::topology::{ConnectionConfig, ResolvedConnection, Topology, LOCAL_ID};

/// A configured unit of work: a handler bound to kwargs and a resolved
/// set of target hosts
#[derive(Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub module: String,
    #[serde(skip_serializing)]
    pub handler: Arc<dyn TaskHandler>,
    pub timeout: Option<u64>,
    pub kwargs: Kwargs,
    pub connection: ResolvedConnection,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("module", &self.module)
            .field("timeout", &self.timeout)
            .field("kwargs", &self.kwargs)
            .field("connection", &self.connection)
            .finish()
    }
}

/// Compiles the `tasks` config section on first access and caches the
/// result for the process lifetime.
pub struct TaskSet {
    config: Arc<AutomateConfig>,
    topology: Arc<Topology>,
    registry: Arc<TaskRegistry>,
    tasks: OnceCell<Arc<HashMap<String, Arc<Task>>>>,
}

impl TaskSet {
    pub fn new(
        config: Arc<AutomateConfig>,
        topology: Arc<Topology>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        TaskSet {
            config,
            topology,
            registry,
            tasks: OnceCell::new(),
        }
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// The compiled task map, keyed by task id
    pub fn tasks(&self) -> Result<Arc<HashMap<String, Arc<Task>>>, AutomateError> {
        self.tasks
            .get_or_try_init(|| self.compile().map(Arc::new))
            .cloned()
    }

    /// Fetch one compiled task; unknown ids are dispatch errors
    pub fn get(&self, task_id: &str) -> Result<Arc<Task>, AutomateError> {
        self.tasks()?
            .get(task_id)
            .cloned()
            .ok_or_else(|| AutomateError::Dispatch {
                task_id: task_id.to_string(),
                message: format!("Task \"{}\" is not defined yet", task_id),
            })
    }

    fn compile(&self) -> Result<HashMap<String, Arc<Task>>, AutomateError> {
        let section = self.config.section_mapping("tasks");

        // a section-level "module" key provides the default for tasks that
        // do not name one; it is not itself a task
        let default_module = match section.get("module") {
            None => None,
            Some(value) => Some(
                value_str(value)
                    .filter(|module| !module.trim().is_empty())
                    .ok_or_else(|| {
                        AutomateError::config(
                            "A default module for tasks must be defined by a string",
                        )
                    })?,
            ),
        };

        let mut tasks = HashMap::new();
        for (key, entry) in &section {
            let Some(id) = value_str(key) else { continue };
            if id == "module" {
                continue;
            }

            let entry = entry.as_mapping().ok_or_else(|| {
                AutomateError::config(format!(
                    "To define the task \"{}\" there must be a mapping",
                    id
                ))
            })?;

            let module = entry
                .get("module")
                .and_then(value_str)
                .filter(|module| !module.trim().is_empty())
                .or_else(|| default_module.clone())
                .ok_or_else(|| {
                    AutomateError::config(format!(
                        "The task \"{}\" must have a module defined to exist",
                        id
                    ))
                })?;

            // binding happens at compile time, so a missing module or
            // function is a configuration error before anything runs
            let handler = self.registry.resolve(&module, &id)?;

            let name = entry
                .get("name")
                .and_then(value_str)
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| id.clone());

            let kwargs = parse_kwargs(&id, entry)?;
            let spec = raw_connection_spec(&id, entry)?;
            let connection = self.topology.resolve_connection(spec)?;

            let task = Task {
                id: id.clone(),
                name,
                module,
                handler,
                timeout: entry.get("timeout").and_then(value_u64),
                kwargs,
                connection,
            };
            tasks.insert(id, Arc::new(task));
        }

        Ok(tasks)
    }
}

fn parse_kwargs(task_id: &str, entry: &Mapping) -> Result<Kwargs, AutomateError> {
    match entry.get("kwargs") {
        None => Ok(Kwargs::new()),
        Some(value) => {
            let json = serde_json::to_value(value).map_err(|e| {
                AutomateError::config(format!(
                    "The kwargs of task \"{}\" are not serializable: {}",
                    task_id, e
                ))
            })?;
            match json {
                serde_json::Value::Null => Ok(Kwargs::new()),
                serde_json::Value::Object(map) => Ok(map),
                _ => Err(AutomateError::config(format!(
                    "The kwargs of task \"{}\" must be a mapping",
                    task_id
                ))),
            }
        }
    }
}

/// Determine the raw connection spec for one task entry.
///
/// Precedence: explicit `connection` block (targeting local when it names
/// neither hosts nor a reference), `use` reference, `hosts` shorthand,
/// local fallback.
fn raw_connection_spec(task_id: &str, entry: &Mapping) -> Result<ConnectionConfig, AutomateError> {
    if let Some(block) = entry.get("connection") {
        let block = block.as_mapping().ok_or_else(|| {
            AutomateError::config(format!(
                "The connection of task \"{}\" must be a mapping",
                task_id
            ))
        })?;
        let mut spec = ConnectionConfig::from_mapping(None, block);
        if spec.hosts.is_none() && spec.use_id.is_none() {
            spec.hosts = Some(vec![LOCAL_ID.to_string()]);
        }
        return Ok(spec);
    }

    if let Some(use_id) = entry.get("use").and_then(value_str) {
        return Ok(ConnectionConfig {
            use_id: Some(use_id),
            ..ConnectionConfig::default()
        });
    }

    if let Some(hosts) = entry.get("hosts").and_then(string_list) {
        return Ok(ConnectionConfig {
            hosts: Some(hosts),
            ..ConnectionConfig::default()
        });
    }

    // without any hosts it's a local command
    Ok(ConnectionConfig {
        hosts: Some(vec![LOCAL_ID.to_string()]),
        ..ConnectionConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::result::TaskReturn;
    use pretty_assertions::assert_eq;

    fn test_registry() -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        for name in ["task1", "task2", "task3"] {
            registry.register_fn("test_tasks", name, |_ctx, _conn, _verbose, _kwargs| {
                Box::pin(async { Ok(TaskReturn::values(serde_json::Value::Null)) })
            });
        }
        Arc::new(registry)
    }

    fn task_set(yaml: &str) -> TaskSet {
        let config = Arc::new(
            AutomateConfig::from_value(serde_yaml::from_str(yaml).unwrap()).unwrap(),
        );
        let topology = Arc::new(Topology::new(config.clone()));
        TaskSet::new(config, topology, test_registry())
    }

    fn fixture() -> TaskSet {
        task_set(
            r#"
hosts:
  host1: {host: ip_address1, port: 22, user: user1, password: password1, sudo: sudo1}
  host2: {name: Server host2, host: ip_address2, user: admin2}
  host3: {host: ip_address3}
hostgroups:
  group1: [host1, host2]
  group3: [group1, host3]
connections:
  port: 22
  user: user_connect_base
  password: password_connect_base
  sudo: sudo_connect_base
  connect_timeout: 30
  connections:
    con1:
      name: A sample connection
      hosts: [local, host1, host2, host3, group3, 192.168.101.1]
      user: user_con1
      password: password_con1
tasks:
  module: test_tasks
  task1: {}
  task2:
    name: Ping our hosts
    kwargs:
      url: https://github.com
    connection:
      use: con1
      user: user_task1
      password: password_task1
  task3:
    hosts: [192.168.101.1]
"#,
        )
    }

    #[test]
    fn test_task_without_connection_targets_local() {
        let set = fixture();
        let task1 = set.get("task1").unwrap();

        assert_eq!(task1.name, "task1");
        assert_eq!(task1.module, "test_tasks");
        assert_eq!(task1.connection.id, "_default");
        assert_eq!(task1.connection.hosts.len(), 1);
        assert!(task1.connection.hosts[0].is_local());
        assert_eq!(task1.connection.hosts[0].id, "local");
        assert_eq!(
            task1.connection.settings.user.as_deref(),
            Some("user_connect_base")
        );
    }

    #[test]
    fn test_task_with_use_reference_and_overrides() {
        let set = fixture();
        let task2 = set.get("task2").unwrap();

        assert_eq!(task2.name, "Ping our hosts");
        assert_eq!(task2.connection.id, "con1");
        assert_eq!(task2.connection.name, "A sample connection");
        // task-local fields beat the named connection, which beats _default
        assert_eq!(task2.connection.settings.user.as_deref(), Some("user_task1"));
        assert_eq!(
            task2.connection.settings.password.as_deref(),
            Some("password_task1")
        );
        assert_eq!(
            task2.connection.settings.sudo.as_deref(),
            Some("sudo_connect_base")
        );
        assert_eq!(task2.connection.settings.connect_timeout, Some(30));

        // hosts deduplicated by id, first occurrence wins
        let ids: Vec<&str> = task2.connection.hosts.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["local", "host1", "host2", "host3", "192.168.101.1"]
        );

        assert_eq!(
            task2.kwargs.get("url").and_then(|v| v.as_str()),
            Some("https://github.com")
        );
    }

    #[test]
    fn test_task_hosts_shorthand() {
        let set = fixture();
        let task3 = set.get("task3").unwrap();

        assert_eq!(task3.connection.id, "_default");
        assert_eq!(task3.connection.hosts.len(), 1);
        assert_eq!(task3.connection.hosts[0].host, "192.168.101.1");
    }

    #[test]
    fn test_compilation_is_cached() {
        let set = fixture();
        let a = set.tasks().unwrap();
        let b = set.tasks().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_default_module_key_is_not_a_task() {
        let set = fixture();
        assert!(matches!(
            set.get("module"),
            Err(AutomateError::Dispatch { .. })
        ));
    }

    #[test]
    fn test_unknown_function_is_config_error() {
        let set = task_set(
            r#"
tasks:
  module: test_tasks
  not_registered: {}
"#,
        );
        assert!(matches!(
            set.tasks(),
            Err(AutomateError::Config { .. })
        ));
    }

    #[test]
    fn test_missing_module_is_config_error() {
        let set = task_set("tasks: {task1: {}}");
        assert!(matches!(set.tasks(), Err(AutomateError::Config { .. })));
    }

    #[test]
    fn test_connection_block_without_hosts_targets_local() {
        let set = task_set(
            r#"
tasks:
  module: test_tasks
  task1:
    connection:
      user: someone
"#,
        );
        let task1 = set.get("task1").unwrap();
        assert_eq!(task1.connection.hosts.len(), 1);
        assert!(task1.connection.hosts[0].is_local());
        assert_eq!(task1.connection.settings.user.as_deref(), Some("someone"));
    }

    #[test]
    fn test_group_hosts_inherit_default_port() {
        let set = task_set(
            r#"
hosts:
  host1: {host: ip1}
  host2: {host: ip2}
hostgroups:
  groupA: [host1, host2]
connections:
  port: 22
tasks:
  module: test_tasks
  task1:
    hosts: [groupA]
"#,
        );
        let task1 = set.get("task1").unwrap();
        assert_eq!(task1.connection.hosts.len(), 2);
        for host in &task1.connection.hosts {
            assert_eq!(task1.connection.port_for(host), 22);
        }
    }
}
