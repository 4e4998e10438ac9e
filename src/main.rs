// Flotilla CLI - configuration-driven task automation

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use flotilla::config::AutomateConfig;
use flotilla::executor::{AppContext, Engine, ReportOptions, RunOverrides};
use flotilla::output::errors::AutomateError;
use flotilla::output::json::results_to_json;
use flotilla::output::terminal::{Logger, TerminalOutput};
use flotilla::shell::Shell;
use flotilla::tasks::builtin::register_builtin;
use flotilla::tasks::{TaskRegistry, TaskSet};
use flotilla::topology::Topology;

#[derive(Parser)]
#[command(
    name = "flotilla",
    about = "Configuration-driven task automation across local and remote hosts",
    version,
    author,
    disable_colored_help = true,
    term_width = 0,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "flotilla.yml")]
    config: PathBuf,
}

#[derive(Subcommand)]
#[command(disable_colored_help = true)]
enum Commands {
    /// Run one or many configured tasks
    Run {
        /// task(s)[:host] to run
        #[arg(required = true)]
        task: Vec<String>,

        /// Run tasks but replace the hosts (comma-separated names, groups or addresses)
        #[arg(long)]
        with_hosts: Option<String>,

        /// Run tasks but replace the connection by a configured connection id
        #[arg(long)]
        with_connection: Option<String>,

        /// Run number of task[:host] by number of threads
        #[arg(long, default_value_t = 0)]
        threads: usize,

        /// Show output from command execution
        #[arg(long)]
        verbose: bool,

        /// Continue with next task(s) also having errors
        #[arg(long = "continue")]
        continue_run: bool,

        /// Return result(s) as json
        #[arg(long)]
        as_json: bool,

        /// Emit raw UTF-8 in json result(s) instead of \u escapes
        #[arg(long)]
        encode_utf8: bool,

        /// No outputs from stdout and stderr in json result(s)
        #[arg(long)]
        without_output: bool,
    },

    /// Start the interactive automation shell
    Shell {
        /// Do not use colored output
        #[arg(long)]
        no_colors: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", err);
            -1
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32, AutomateError> {
    let config = Arc::new(AutomateConfig::from_file(&cli.config)?);

    let mut registry = TaskRegistry::new();
    register_builtin(&mut registry);

    let topology = Arc::new(Topology::new(config.clone()));
    let tasks = Arc::new(TaskSet::new(config.clone(), topology, Arc::new(registry)));

    match cli.command {
        Commands::Run {
            task,
            with_hosts,
            with_connection,
            threads,
            verbose,
            continue_run,
            as_json,
            encode_utf8,
            without_output,
        } => {
            let logger = Arc::new(Logger::new(true));
            let ctx = Arc::new(AppContext::new(config, logger));
            let engine = Engine::new(ctx, tasks);

            let overrides = RunOverrides {
                with_hosts: with_hosts.map(|raw| {
                    raw.split(',')
                        .map(|member| member.trim().to_string())
                        .filter(|member| !member.is_empty())
                        .collect()
                }),
                with_connection,
            };
            let opts = ReportOptions {
                collect_results: true,
                include_outputs: !without_output,
            };

            let output = TerminalOutput::new(verbose);
            if !as_json {
                output.print_run_header(&task, threads);
            }

            let report = if threads > 0 {
                let progress = output.create_selector_progress(&task.join(" "));
                let report = engine
                    .run_threaded(threads, &task, verbose, &overrides, &opts)
                    .await;
                progress.finish_and_clear();
                report
            } else {
                engine
                    .run_sequential(&task, continue_run, verbose, &overrides, &opts)
                    .await
            };

            if as_json {
                println!("{}", results_to_json(&report.results, encode_utf8)?);
            } else {
                for group in &report.results {
                    for result in group {
                        output.print_task_result(result);
                    }
                }
                output.print_recap(
                    report.ok_count(),
                    report.failed_count(),
                    report.sum_exit_codes,
                );
            }

            Ok(report.sum_exit_codes)
        }

        Commands::Shell { no_colors } => {
            let logger = Arc::new(Logger::new(!no_colors));
            logger.set_debug(true);
            let ctx = Arc::new(AppContext::new(config, logger));
            let engine = Engine::new(ctx, tasks);

            let mut shell = Shell::new(engine);
            shell.launch().await?;
            Ok(0)
        }
    }
}
