// Builtin task module registered by the CLI binary

use crate::executor::RunOptions;
use crate::output::errors::AutomateError;
use crate::tasks::registry::{Kwargs, TaskRegistry};

/// Module name the builtin handlers are registered under
pub const BUILTIN_MODULE: &str = "builtin";

/// Register the builtin task functions.
///
/// Configured tasks bind to these by id, e.g.
///
/// ```yaml
/// automate:
///   tasks:
///     uname:
///       module: builtin
///       hosts: [webservers]
///       kwargs:
///         flags: ["-a"]
/// ```
pub fn register_builtin(registry: &mut TaskRegistry) {
    registry.register_fn(BUILTIN_MODULE, "uname", |ctx, connection, verbose, kwargs| {
        Box::pin(async move {
            ctx.logger.info("Automation uname called");
            let flags = string_seq(kwargs, "flags").join(" ");
            let command = if flags.is_empty() {
                "uname".to_string()
            } else {
                format!("uname {}", flags)
            };
            let output = connection
                .run(&command, RunOptions::new().with_hide(!verbose))
                .await?;
            Ok(output.into())
        })
    });

    registry.register_fn(BUILTIN_MODULE, "uptime", |ctx, connection, verbose, _kwargs| {
        Box::pin(async move {
            ctx.logger.info("Automation uptime called");
            let output = connection
                .run("uptime", RunOptions::new().with_hide(!verbose))
                .await?;
            Ok(output.into())
        })
    });

    registry.register_fn(BUILTIN_MODULE, "command", |ctx, connection, verbose, kwargs| {
        Box::pin(async move {
            let command = kwargs
                .get("command")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    AutomateError::config_with_hint(
                        "The builtin command task needs a \"command\" kwarg",
                        "Set tasks.<id>.kwargs.command to the shell command to run",
                    )
                })?;
            ctx.logger.debug(format!("Automation command: {}", command));

            let opts = RunOptions::new()
                .with_hide(!verbose)
                .with_warn(kwargs.get("warn").and_then(|v| v.as_bool()).unwrap_or(false));

            let escalate = kwargs
                .get("sudo")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            let output = if escalate {
                connection.sudo(command, opts).await?
            } else {
                connection.run(command, opts).await?
            };
            Ok(output.into())
        })
    });
}

fn string_seq(kwargs: &Kwargs, key: &str) -> Vec<String> {
    kwargs
        .get(key)
        .and_then(|v| v.as_array())
        .map(|seq| {
            seq.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutomateConfig;
    use crate::executor::{AppContext, LocalConnection};
    use crate::output::terminal::Logger;
    use std::sync::Arc;

    fn context() -> AppContext {
        AppContext::new(
            Arc::new(AutomateConfig::new()),
            Arc::new(Logger::new(false)),
        )
    }

    #[tokio::test]
    async fn test_builtin_command_runs_locally() {
        let mut registry = TaskRegistry::new();
        register_builtin(&mut registry);

        let handler = registry.resolve(BUILTIN_MODULE, "command").unwrap();
        let connection = LocalConnection::new("_default", "local", None);
        let mut kwargs = Kwargs::new();
        kwargs.insert(
            "command".to_string(),
            serde_json::Value::String("echo builtin".to_string()),
        );

        let ret = handler
            .run(&context(), &connection, false, &kwargs)
            .await
            .unwrap();

        match ret {
            crate::executor::TaskReturn::Command { output, .. } => {
                assert!(output.success());
                assert!(output.stdout.contains("builtin"));
            }
            other => panic!("expected command return, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_builtin_command_without_kwarg_fails() {
        let mut registry = TaskRegistry::new();
        register_builtin(&mut registry);

        let handler = registry.resolve(BUILTIN_MODULE, "command").unwrap();
        let connection = LocalConnection::new("_default", "local", None);

        let ret = handler
            .run(&context(), &connection, false, &Kwargs::new())
            .await;
        assert!(matches!(ret, Err(AutomateError::Config { .. })));
    }

    #[tokio::test]
    async fn test_builtin_uname_registered() {
        let mut registry = TaskRegistry::new();
        register_builtin(&mut registry);
        assert!(registry.resolve(BUILTIN_MODULE, "uname").is_ok());
        assert!(registry.resolve(BUILTIN_MODULE, "uptime").is_ok());
    }
}
