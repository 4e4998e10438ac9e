// Task execution results

use serde::Serialize;
use serde_json::Value as JsonValue;

use super::CommandOutput;

/// What a task handler hands back to the engine
#[derive(Debug, Clone)]
pub enum TaskReturn {
    /// A command-shaped result: the four standard fields, plus any extra
    /// computed payload
    Command {
        output: CommandOutput,
        values: Option<JsonValue>,
    },
    /// An opaque payload; implies a successful execution
    Values(JsonValue),
}

impl From<CommandOutput> for TaskReturn {
    fn from(output: CommandOutput) -> Self {
        TaskReturn::Command {
            output,
            values: None,
        }
    }
}

impl TaskReturn {
    pub fn values(values: impl Into<JsonValue>) -> Self {
        TaskReturn::Values(values.into())
    }
}

/// The outcome of running one task against one host.
///
/// Immutable after creation apart from output redaction for serialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub connection_id: Option<String>,
    pub host_id: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub command: Option<String>,
    pub exited: i32,
    pub values: Option<JsonValue>,
}

impl TaskResult {
    /// Wrap a handler return value into a result record
    pub fn from_return(
        task_id: impl Into<String>,
        connection_id: impl Into<String>,
        host_id: impl Into<String>,
        ret: TaskReturn,
    ) -> Self {
        let (stdout, stderr, command, exited, values) = match ret {
            TaskReturn::Command { output, values } => (
                Some(output.stdout),
                Some(output.stderr),
                Some(output.command),
                output.exited,
                values,
            ),
            TaskReturn::Values(values) => (None, None, None, 0, Some(values)),
        };

        TaskResult {
            task_id: task_id.into(),
            connection_id: Some(connection_id.into()),
            host_id: Some(host_id.into()),
            stdout,
            stderr,
            command,
            exited,
            values,
        }
    }

    /// Synthetic result for a selector that could not be dispatched
    pub fn dispatch_failure(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        let task_id = task_id.into();
        TaskResult {
            command: Some(format!("automate run {}", task_id)),
            task_id,
            connection_id: None,
            host_id: None,
            stdout: Some(String::new()),
            stderr: Some(message.into()),
            exited: -1,
            values: None,
        }
    }

    /// Synthetic result for a host whose execution raised instead of
    /// returning
    pub fn host_failure(
        task_id: impl Into<String>,
        connection_id: impl Into<String>,
        host_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        TaskResult {
            task_id: task_id.into(),
            connection_id: Some(connection_id.into()),
            host_id: Some(host_id.into()),
            stdout: Some(String::new()),
            stderr: Some(message.into()),
            command: None,
            exited: -1,
            values: None,
        }
    }

    pub fn success(&self) -> bool {
        self.exited == 0
    }

    /// Drop captured outputs before serialization (`--without-output`)
    pub fn strip_outputs(&mut self) {
        self.stdout = None;
        self.stderr = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_return_copies_standard_fields() {
        let ret = TaskReturn::Command {
            output: CommandOutput {
                stdout: "Out".to_string(),
                stderr: "Err".to_string(),
                command: "Cmd".to_string(),
                exited: 1,
            },
            values: Some(json!({"a": 1, "b": "2nd"})),
        };

        let result = TaskResult::from_return("task1", "con1", "host1", ret);
        assert_eq!(result.stdout.as_deref(), Some("Out"));
        assert_eq!(result.stderr.as_deref(), Some("Err"));
        assert_eq!(result.command.as_deref(), Some("Cmd"));
        assert_eq!(result.exited, 1);
        assert_eq!(result.values, Some(json!({"a": 1, "b": "2nd"})));
        assert!(!result.success());
    }

    #[test]
    fn test_opaque_return_round_trips_as_values() {
        // a payload without the command-result shape lands in `values`
        // untouched, with a successful exit status
        let payload = json!({"checked": 3, "drift": false});
        let result =
            TaskResult::from_return("audit", "_default", "local", TaskReturn::values(payload.clone()));

        assert_eq!(result.exited, 0);
        assert_eq!(result.values, Some(payload));
        assert_eq!(result.stdout, None);
        assert_eq!(result.stderr, None);
        assert_eq!(result.command, None);
    }

    #[test]
    fn test_dispatch_failure_shape() {
        let result = TaskResult::dispatch_failure("ghost", "Task \"ghost\" is not defined yet");
        assert_eq!(result.exited, -1);
        assert_eq!(result.command.as_deref(), Some("automate run ghost"));
        assert_eq!(result.connection_id, None);
        assert_eq!(result.host_id, None);
    }

    #[test]
    fn test_strip_outputs() {
        let mut result = TaskResult::from_return(
            "t",
            "c",
            "h",
            TaskReturn::from(CommandOutput {
                stdout: "secret".to_string(),
                stderr: "secret".to_string(),
                command: "env".to_string(),
                exited: 0,
            }),
        );
        result.strip_outputs();
        assert_eq!(result.stdout, None);
        assert_eq!(result.stderr, None);
        assert_eq!(result.command.as_deref(), Some("env"));
    }
}
