// Human-readable error messages for Flotilla

use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;

use colored::*;

/// Initialize color output based on TTY detection and NO_COLOR environment variable
fn should_use_colors() -> bool {
    // Check NO_COLOR environment variable first (https://no-color.org/)
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    // Check if stderr is a TTY (errors are typically written to stderr)
    std::io::stderr().is_terminal()
}

/// All error types in Flotilla
#[derive(Debug)]
pub enum AutomateError {
    /// Configuration errors (malformed entries, reserved identifiers,
    /// unknown modules or functions). Fatal at resolution time.
    Config {
        message: String,
        suggestion: Option<String>,
    },

    /// Dispatch errors (a selector referencing an unknown task id).
    /// Recoverable per selector.
    Dispatch { task_id: String, message: String },

    /// I/O errors
    Io {
        message: String,
        path: Option<PathBuf>,
    },

    /// SSH connection errors
    Ssh {
        host: String,
        message: String,
        suggestion: Option<String>,
    },

    /// A command finished with a non-zero exit status while `warn` was off
    Command {
        host: String,
        command: String,
        stdout: String,
        stderr: String,
        exited: i32,
    },

    /// Task execution errors (handler failures that are not command exits)
    Task {
        task_id: String,
        host: String,
        message: String,
    },

    /// A per-host task run exceeded its configured deadline
    Timeout {
        task_id: String,
        host: String,
        duration_secs: u64,
    },
}

impl AutomateError {
    /// Configuration error shorthand without a suggestion
    pub fn config(message: impl Into<String>) -> Self {
        AutomateError::Config {
            message: message.into(),
            suggestion: None,
        }
    }

    /// Configuration error with a remediation hint
    pub fn config_with_hint(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        AutomateError::Config {
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }
}

impl std::error::Error for AutomateError {}

impl fmt::Display for AutomateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Set color mode based on TTY detection and NO_COLOR
        if !should_use_colors() {
            colored::control::set_override(false);
        }

        match self {
            AutomateError::Config {
                message,
                suggestion,
            } => {
                write!(f, "{}: {}", "CONFIG ERROR".red().bold(), message)?;
                if let Some(hint) = suggestion {
                    write!(f, "\n  {} {}", "hint:".cyan(), hint)?;
                }
                Ok(())
            }

            AutomateError::Dispatch { task_id, message } => {
                write!(
                    f,
                    "{}: task {}: {}",
                    "DISPATCH ERROR".red().bold(),
                    task_id.cyan(),
                    message
                )
            }

            AutomateError::Io { message, path } => {
                write!(f, "{}: {}", "IO ERROR".red().bold(), message)?;
                if let Some(path) = path {
                    write!(f, " ({})", path.display().to_string().dimmed())?;
                }
                Ok(())
            }

            AutomateError::Ssh {
                host,
                message,
                suggestion,
            } => {
                write!(
                    f,
                    "{}: {}: {}",
                    "SSH ERROR".red().bold(),
                    host.cyan(),
                    message
                )?;
                if let Some(hint) = suggestion {
                    write!(f, "\n  {} {}", "hint:".cyan(), hint)?;
                }
                Ok(())
            }

            AutomateError::Command {
                host,
                command,
                exited,
                stderr,
                ..
            } => {
                write!(
                    f,
                    "{}: {}: `{}` exited with status {}",
                    "COMMAND FAILED".red().bold(),
                    host.cyan(),
                    command,
                    exited
                )?;
                if !stderr.is_empty() {
                    write!(f, "\n  {}", stderr.trim_end().dimmed())?;
                }
                Ok(())
            }

            AutomateError::Task {
                task_id,
                host,
                message,
            } => {
                write!(
                    f,
                    "{}: {} on {}: {}",
                    "TASK ERROR".red().bold(),
                    task_id.cyan(),
                    host.cyan(),
                    message
                )
            }

            AutomateError::Timeout {
                task_id,
                host,
                duration_secs,
            } => {
                write!(
                    f,
                    "{}: {} on {} exceeded {}s",
                    "TIMEOUT".red().bold(),
                    task_id.cyan(),
                    host.cyan(),
                    duration_secs
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        colored::control::set_override(false);
        let err = AutomateError::config("missing \"host\" field");
        assert!(err.to_string().contains("missing \"host\" field"));
    }

    #[test]
    fn test_command_error_display() {
        colored::control::set_override(false);
        let err = AutomateError::Command {
            host: "web1".to_string(),
            command: "uptime".to_string(),
            stdout: String::new(),
            stderr: "boom".to_string(),
            exited: 2,
        };
        let text = err.to_string();
        assert!(text.contains("uptime"));
        assert!(text.contains("status 2"));
        assert!(text.contains("boom"));
    }
}
