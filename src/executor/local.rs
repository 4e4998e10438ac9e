// Local command execution without SSH

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{finish_command, shell_quote, CommandOutput, Connection, RunOptions};
use crate::output::errors::AutomateError;

/// Execution handle for the machine the process runs on
pub struct LocalConnection {
    connection_id: String,
    host_id: String,
    sudo_password: Option<String>,
}

impl LocalConnection {
    pub fn new(
        connection_id: impl Into<String>,
        host_id: impl Into<String>,
        sudo_password: Option<String>,
    ) -> Self {
        LocalConnection {
            connection_id: connection_id.into(),
            host_id: host_id.into(),
            sudo_password,
        }
    }

    async fn exec(
        &self,
        program: &str,
        args: &[&str],
        command: &str,
        stdin: Option<&str>,
    ) -> Result<CommandOutput, AutomateError> {
        let mut builder = Command::new(program);
        builder
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = builder.spawn().map_err(|e| AutomateError::Task {
            task_id: String::new(),
            host: self.host_id.clone(),
            message: format!("Failed to spawn local command: {}", e),
        })?;

        if let Some(input) = stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle
                    .write_all(format!("{}\n", input).as_bytes())
                    .await
                    .ok();
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AutomateError::Task {
                task_id: String::new(),
                host: self.host_id.clone(),
                message: format!("Failed to execute local command: {}", e),
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            command: command.to_string(),
            exited: output.status.code().unwrap_or(-1),
        })
    }
}

#[async_trait]
impl Connection for LocalConnection {
    async fn run(&self, command: &str, opts: RunOptions) -> Result<CommandOutput, AutomateError> {
        let output = self.exec("sh", &["-c", command], command, None).await?;
        finish_command(&self.host_id, output, opts)
    }

    async fn sudo(&self, command: &str, opts: RunOptions) -> Result<CommandOutput, AutomateError> {
        let quoted = shell_quote(command);

        let output = match self.sudo_password.as_deref() {
            Some(password) => {
                // -S reads the password from stdin, the empty -p suppresses
                // the prompt text in stderr
                let line = format!("sudo -S -p '' sh -c {}", quoted);
                self.exec("sh", &["-c", line.as_str()], command, Some(password))
                    .await?
            }
            None => {
                let line = format!("sudo -n sh -c {}", quoted);
                self.exec("sh", &["-c", line.as_str()], command, None).await?
            }
        };

        finish_command(&self.host_id, output, opts)
    }

    fn host_id(&self) -> &str {
        &self.host_id
    }

    fn connection_id(&self) -> &str {
        &self.connection_id
    }
}
