// Rich terminal output for Flotilla

use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colored::*;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::executor::result::TaskResult;

/// Leveled logger writing colored prefixes to the terminal.
///
/// Colors are suppressed by `--no-colors`, the NO_COLOR environment
/// variable, or a non-TTY stdout.
pub struct Logger {
    colors: AtomicBool,
    debug: AtomicBool,
}

impl Logger {
    pub fn new(colors: bool) -> Self {
        let is_tty = std::io::stdout().is_terminal();
        let colors = colors && is_tty && std::env::var("NO_COLOR").is_err();

        Logger {
            colors: AtomicBool::new(colors),
            debug: AtomicBool::new(false),
        }
    }

    /// Enable debug-level lines (hidden by default)
    pub fn set_debug(&self, on: bool) {
        self.debug.store(on, Ordering::Relaxed);
    }

    fn colored(&self) -> bool {
        self.colors.load(Ordering::Relaxed)
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if self.colored() {
            println!("{} {}", "INFO:".green(), msg.as_ref());
        } else {
            println!("INFO: {}", msg.as_ref());
        }
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        if self.colored() {
            println!("{} {}", "WARN:".yellow(), msg.as_ref());
        } else {
            println!("WARN: {}", msg.as_ref());
        }
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        if self.colored() {
            eprintln!("{} {}", "ERR:".red(), msg.as_ref());
        } else {
            eprintln!("ERR: {}", msg.as_ref());
        }
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        if !self.debug.load(Ordering::Relaxed) {
            return;
        }
        if self.colored() {
            println!("{} {}", "DEBUG:".magenta(), msg.as_ref());
        } else {
            println!("DEBUG: {}", msg.as_ref());
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Logger::new(true)
    }
}

/// Terminal output manager for task runs
pub struct TerminalOutput {
    multi_progress: MultiProgress,
    verbose: bool,
    is_tty: bool,
}

impl TerminalOutput {
    pub fn new(verbose: bool) -> Self {
        let is_tty = std::io::stdout().is_terminal();

        // Respect NO_COLOR environment variable (https://no-color.org/)
        // Also disable colors if not a TTY
        if std::env::var("NO_COLOR").is_ok() || !is_tty {
            colored::control::set_override(false);
        }

        TerminalOutput {
            multi_progress: MultiProgress::new(),
            verbose,
            is_tty,
        }
    }

    /// Print a header before running a batch of selectors
    pub fn print_run_header(&self, selectors: &[String], threads: usize) {
        println!();
        if threads > 0 {
            println!(
                "{} {} ({} workers)",
                "RUN".green().bold(),
                selectors.join(" ").cyan(),
                threads
            );
        } else {
            println!("{} {}", "RUN".green().bold(), selectors.join(" ").cyan());
        }
        println!("{}", "─".repeat(60).dimmed());
    }

    /// Create a progress spinner for one selector
    pub fn create_selector_progress(&self, selector: &str) -> ProgressBar {
        let pb = self.multi_progress.add(ProgressBar::new_spinner());

        let style = if self.is_tty {
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {prefix:.bold} {msg}")
                .unwrap()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        } else {
            ProgressStyle::default_spinner()
                .template("{prefix} {msg}")
                .unwrap()
        };

        pb.set_style(style);
        pb.set_prefix(selector.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Print the outcome of one (task, host) execution
    pub fn print_task_result(&self, result: &TaskResult) {
        let host = result.host_id.as_deref().unwrap_or("-");

        if result.success() {
            println!(
                "{} {} {}",
                "ok:".green().bold(),
                format!("[{}]", host).cyan(),
                result.task_id
            );
        } else {
            println!(
                "{} {} {} {}",
                "failed:".red().bold(),
                format!("[{}]", host).cyan(),
                result.task_id,
                format!("rc={}", result.exited).dimmed()
            );
        }

        if self.verbose {
            if let Some(stdout) = result.stdout.as_deref() {
                for line in stdout.lines() {
                    println!("  {}", line);
                }
            }
        }
        if let Some(stderr) = result.stderr.as_deref() {
            if !result.success() && !stderr.is_empty() {
                for line in stderr.lines() {
                    println!("  {}", line.red());
                }
            }
        }
    }

    /// Print the closing summary for a run
    pub fn print_recap(&self, ok: usize, failed: usize, sum_exit_codes: i32) {
        println!("{}", "─".repeat(60).dimmed());
        println!(
            "{} {}  {}  {}",
            "RECAP".bold(),
            format!("ok={}", ok).green(),
            if failed > 0 {
                format!("failed={}", failed).red().to_string()
            } else {
                format!("failed={}", failed).dimmed().to_string()
            },
            format!("exit={}", sum_exit_codes).dimmed()
        );
    }
}
