// Interactive automation shell

use std::io::Write;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};

use crate::executor::{Engine, ReportOptions, RunOverrides};
use crate::output::errors::AutomateError;
use crate::output::json::results_to_json;

/// Shell lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Running,
    Stopped,
}

#[derive(Parser)]
#[command(
    name = "",
    no_binary_name = true,
    disable_version_flag = true,
    about = "control the automate shell"
)]
struct ShellCommand {
    #[command(subcommand)]
    command: ShellCmd,
}

#[derive(Subcommand)]
enum ShellCmd {
    /// Show the configured tasks
    List,
    /// Show expanded task details
    Show {
        /// task_id(s) to show
        #[arg(required = true)]
        tasks: Vec<String>,
    },
    /// Run one or many configured tasks
    Run {
        /// task_id(s)[:host] to run
        #[arg(required = true)]
        tasks: Vec<String>,
        /// run by number of threads
        #[arg(long, default_value_t = 0)]
        threads: usize,
        /// show output from command execution
        #[arg(long)]
        verbose: bool,
        /// show results as json
        #[arg(long)]
        as_json: bool,
        /// hide outputs from stdout and stderr
        #[arg(long)]
        without_output: bool,
    },
    /// About hosts
    Hosts {
        #[command(subcommand)]
        action: ListAction,
    },
    /// About hostgroups
    Hostgroups {
        #[command(subcommand)]
        action: ListAction,
    },
    /// About connections
    Connections {
        #[command(subcommand)]
        action: ListAction,
    },
    /// Leave the shell
    Exit,
    /// Leave the shell
    Quit,
}

#[derive(Subcommand)]
enum ListAction {
    /// Show the configured entries
    List,
}

/// The interactive automation shell.
///
/// An explicit state machine: the loop keeps cycling prompt → parse →
/// dispatch while in `Running`. `exit`/`quit`, EOF and a termination
/// signal transition to `Stopped`; Ctrl-C only clears the pending input.
pub struct Shell {
    engine: Engine,
    state: ShellState,
    pending: String,
}

impl Shell {
    pub fn new(engine: Engine) -> Self {
        Shell {
            engine,
            state: ShellState::Running,
            pending: String::new(),
        }
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    /// Compile the task map, then enter the interactive loop
    pub async fn launch(&mut self) -> Result<(), AutomateError> {
        self.engine.tasks().tasks()?;

        let logger = self.engine.context().logger.clone();
        logger.info("Welcome to the automate interactive shell.");

        let mut terminate = signal(SignalKind::terminate()).map_err(|e| AutomateError::Io {
            message: format!("Failed to install signal handler: {}", e),
            path: None,
        })?;
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while self.state == ShellState::Running {
            self.prompt();

            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.dispatch(line.trim().to_string()).await,
                    Ok(None) | Err(_) => {
                        logger.info("bye bye using automate shell...");
                        self.state = ShellState::Stopped;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    // Ctrl-C is swallowed; it only resets the pending input
                    self.pending.clear();
                    println!();
                }
                _ = terminate.recv() => {
                    self.state = ShellState::Stopped;
                }
            }
        }

        Ok(())
    }

    fn prompt(&self) {
        if self.pending.is_empty() {
            print!("Automate> ");
        } else {
            // repeat the offending input so it can be corrected
            print!("Automate [{}]> ", self.pending);
        }
        std::io::stdout().flush().ok();
    }

    /// Parse and execute one input line
    pub async fn dispatch(&mut self, line: String) {
        if line.is_empty() {
            return;
        }
        if line == "exit" || line == "quit" {
            self.engine
                .context()
                .logger
                .info("bye bye using automate shell...");
            self.state = ShellState::Stopped;
            return;
        }

        match ShellCommand::try_parse_from(line.split_whitespace()) {
            Ok(parsed) => {
                self.pending.clear();
                println!();
                if let Err(err) = self.handle(parsed.command).await {
                    self.engine.context().logger.error(err.to_string());
                }
                println!();
            }
            Err(err) => {
                // clap renders usage and error text itself
                err.print().ok();
                self.pending = line;
            }
        }
    }

    async fn handle(&mut self, cmd: ShellCmd) -> Result<(), AutomateError> {
        let logger = self.engine.context().logger.clone();

        match cmd {
            ShellCmd::List => {
                logger.debug(
                    chrono::Utc::now()
                        .format("%Y-%m-%d %H:%M:%S %z")
                        .to_string(),
                );
                let tasks = self.engine.tasks().tasks()?;
                let mut ids: Vec<_> = tasks.keys().collect();
                ids.sort();
                for id in ids {
                    let task = &tasks[id];
                    if task.id == task.name {
                        println!("{}", task.id);
                    } else {
                        println!("{} - {}", task.id, task.name);
                    }
                }
            }

            ShellCmd::Show { tasks } => {
                for task_id in tasks {
                    match self.engine.tasks().get(&task_id) {
                        Ok(task) => match serde_json::to_string_pretty(task.as_ref()) {
                            Ok(dump) => println!("{}", dump),
                            Err(err) => logger.error(err.to_string()),
                        },
                        Err(err) => logger.error(err.to_string()),
                    }
                }
            }

            ShellCmd::Run {
                tasks,
                threads,
                verbose,
                as_json,
                without_output,
            } => {
                let opts = ReportOptions {
                    collect_results: as_json,
                    include_outputs: !without_output,
                };
                let overrides = RunOverrides::default();

                let report = if threads >= 1 {
                    self.engine
                        .run_threaded(threads, &tasks, verbose, &overrides, &opts)
                        .await
                } else {
                    self.engine
                        .run_sequential(&tasks, false, verbose, &overrides, &opts)
                        .await
                };

                if as_json {
                    println!("{}", results_to_json(&report.results, true)?);
                }
            }

            ShellCmd::Hosts { action: ListAction::List } => {
                let hosts = self.engine.tasks().topology().hosts()?;
                let mut ids: Vec<_> = hosts.keys().collect();
                ids.sort();
                for id in ids {
                    println!("{}: {}", id, summary(&hosts[id])?);
                }
            }

            ShellCmd::Hostgroups { action: ListAction::List } => {
                let groups = self.engine.tasks().topology().hostgroups()?;
                let mut ids: Vec<_> = groups.keys().collect();
                ids.sort();
                for id in ids {
                    println!("{}: {}", id, summary(&groups[id])?);
                }
            }

            ShellCmd::Connections { action: ListAction::List } => {
                let connections = self.engine.tasks().topology().connections()?;
                println!("_default: {}", summary(&connections.default)?);
                let mut ids: Vec<_> = connections.named.keys().collect();
                ids.sort();
                for id in ids {
                    println!("{}: {}", id, summary(&connections.named[id])?);
                }
            }

            ShellCmd::Exit | ShellCmd::Quit => {
                logger.info("bye bye using automate shell...");
                self.state = ShellState::Stopped;
            }
        }

        Ok(())
    }
}

fn summary<T: serde::Serialize>(value: &T) -> Result<String, AutomateError> {
    serde_json::to_string(value).map_err(|e| AutomateError::Io {
        message: format!("Failed to serialize: {}", e),
        path: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutomateConfig;
    use crate::executor::AppContext;
    use crate::output::terminal::Logger;
    use crate::tasks::{TaskRegistry, TaskSet};
    use crate::topology::Topology;
    use std::sync::Arc;

    fn shell() -> Shell {
        let config = Arc::new(
            AutomateConfig::from_value(
                serde_yaml::from_str(
                    r#"
tasks:
  module: testmod
  greet: {}
"#,
                )
                .unwrap(),
            )
            .unwrap(),
        );

        let mut registry = TaskRegistry::new();
        registry.register_fn("testmod", "greet", |_ctx, _conn, _verbose, _kwargs| {
            Box::pin(async {
                Ok(crate::executor::TaskReturn::values(serde_json::json!(
                    "hello"
                )))
            })
        });

        let topology = Arc::new(Topology::new(config.clone()));
        let tasks = Arc::new(TaskSet::new(config.clone(), topology, Arc::new(registry)));
        let ctx = Arc::new(AppContext::new(config, Arc::new(Logger::new(false))));
        Shell::new(Engine::new(ctx, tasks))
    }

    #[tokio::test]
    async fn test_exit_transitions_to_stopped() {
        let mut shell = shell();
        assert_eq!(shell.state(), ShellState::Running);
        shell.dispatch("exit".to_string()).await;
        assert_eq!(shell.state(), ShellState::Stopped);
    }

    #[tokio::test]
    async fn test_quit_subcommand_stops() {
        let mut shell = shell();
        shell.dispatch("quit".to_string()).await;
        assert_eq!(shell.state(), ShellState::Stopped);
    }

    #[tokio::test]
    async fn test_unknown_input_is_kept_for_correction() {
        let mut shell = shell();
        shell.dispatch("rnu greet".to_string()).await;
        assert_eq!(shell.state(), ShellState::Running);
        assert_eq!(shell.pending, "rnu greet");

        // a valid command clears the pending input
        shell.dispatch("list".to_string()).await;
        assert!(shell.pending.is_empty());
    }

    #[tokio::test]
    async fn test_run_command_executes_tasks() {
        let mut shell = shell();
        shell.dispatch("run greet".to_string()).await;
        assert_eq!(shell.state(), ShellState::Running);
    }

    #[test]
    fn test_command_grammar() {
        assert!(ShellCommand::try_parse_from(["list"]).is_ok());
        assert!(ShellCommand::try_parse_from(["show", "greet"]).is_ok());
        assert!(ShellCommand::try_parse_from(["show"]).is_err());
        assert!(ShellCommand::try_parse_from([
            "run", "greet:host1", "--threads", "4", "--verbose"
        ])
        .is_ok());
        assert!(ShellCommand::try_parse_from(["hosts", "list"]).is_ok());
        assert!(ShellCommand::try_parse_from(["hostgroups", "list"]).is_ok());
        assert!(ShellCommand::try_parse_from(["connections", "list"]).is_ok());
        assert!(ShellCommand::try_parse_from(["bogus"]).is_err());
    }
}
