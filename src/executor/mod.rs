// Executor module - connection handles and the task engine

pub mod background;
pub mod context;
pub mod engine;
pub mod local;
pub mod result;
pub mod ssh;

pub use background::{JobId, JobStatus, JobTracker};
pub use context::AppContext;
pub use engine::{Engine, ReportOptions, RunOverrides, RunReport, Selector};
pub use local::LocalConnection;
pub use result::{TaskResult, TaskReturn};
pub use ssh::SshConnection;

use async_trait::async_trait;
use serde::Serialize;

use crate::output::errors::AutomateError;
use crate::topology::{Host, ResolvedConnection};

/// Options for a single command execution
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Suppress echoing captured output to the terminal
    pub hide: bool,
    /// Treat a non-zero exit as a normal result instead of an error
    pub warn: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        RunOptions {
            hide: true,
            warn: false,
        }
    }

    pub fn with_hide(mut self, hide: bool) -> Self {
        self.hide = hide;
        self
    }

    pub fn with_warn(mut self, warn: bool) -> Self {
        self.warn = warn;
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions::new()
    }
}

/// Result of executing a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub command: String,
    pub exited: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exited == 0
    }
}

/// Common trait for all connection types (SSH, local)
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a command and return the captured result
    async fn run(&self, command: &str, opts: RunOptions) -> Result<CommandOutput, AutomateError>;

    /// Execute a command with privilege escalation.
    ///
    /// Uses the configured sudo password when one is present, otherwise
    /// falls back to non-interactive sudo.
    async fn sudo(&self, command: &str, opts: RunOptions) -> Result<CommandOutput, AutomateError>;

    /// Id of the host this handle executes on
    fn host_id(&self) -> &str;

    /// Id of the connection this handle was built from
    fn connection_id(&self) -> &str;
}

/// Wrapper for the different connection types
pub enum AnyConnection {
    Local(LocalConnection),
    Ssh(SshConnection),
}

impl AnyConnection {
    /// Get the underlying connection as a trait object
    pub fn as_connection(&self) -> &dyn Connection {
        match self {
            AnyConnection::Local(conn) => conn,
            AnyConnection::Ssh(conn) => conn,
        }
    }
}

/// Build a live execution handle for one resolved (connection, host) pair.
///
/// A fresh handle is created per execution; handles are never pooled.
pub fn open_connection(
    connection: &ResolvedConnection,
    host: &Host,
) -> Result<AnyConnection, AutomateError> {
    if host.is_local() {
        Ok(AnyConnection::Local(LocalConnection::new(
            connection.id.clone(),
            host.id.clone(),
            connection.sudo_for(host),
        )))
    } else {
        Ok(AnyConnection::Ssh(SshConnection::connect(connection, host)?))
    }
}

/// Apply the `hide`/`warn` contract to a captured command result
pub(crate) fn finish_command(
    host: &str,
    output: CommandOutput,
    opts: RunOptions,
) -> Result<CommandOutput, AutomateError> {
    if !opts.hide {
        if !output.stdout.is_empty() {
            print!("{}", output.stdout);
        }
        if !output.stderr.is_empty() {
            eprint!("{}", output.stderr);
        }
    }

    if !opts.warn && !output.success() {
        return Err(AutomateError::Command {
            host: host.to_string(),
            command: output.command,
            stdout: output.stdout,
            stderr: output.stderr,
            exited: output.exited,
        });
    }

    Ok(output)
}

/// Single-quote a string for `sh -c` embedding
pub(crate) fn shell_quote(command: &str) -> String {
    format!("'{}'", command.replace('\'', r"'\''"))
}
