// The task execution engine

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;

use super::background::{JobId, JobTracker};
use super::context::AppContext;
use super::open_connection;
use super::result::{TaskResult, TaskReturn};
use crate::output::errors::AutomateError;
use crate::tasks::{Task, TaskSet};
use crate::topology::{ConnectionConfig, Host};

/// A `task_id` or `task_id:host_id` run selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub task_id: String,
    pub host_id: Option<String>,
}

impl Selector {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((task_id, host_id)) if !host_id.is_empty() => Selector {
                task_id: task_id.to_string(),
                host_id: Some(host_id.to_string()),
            },
            Some((task_id, _)) => Selector {
                task_id: task_id.to_string(),
                host_id: None,
            },
            None => Selector {
                task_id: raw.to_string(),
                host_id: None,
            },
        }
    }

    fn host_filter(&self) -> Vec<String> {
        self.host_id.iter().cloned().collect()
    }
}

/// How results are collected into the report
#[derive(Debug, Clone, Copy)]
pub struct ReportOptions {
    /// Keep per-host result records in the report
    pub collect_results: bool,
    /// Keep stdout/stderr on collected records
    pub include_outputs: bool,
}

impl ReportOptions {
    pub fn collected() -> Self {
        ReportOptions {
            collect_results: true,
            include_outputs: true,
        }
    }
}

impl Default for ReportOptions {
    fn default() -> Self {
        ReportOptions::collected()
    }
}

/// Optional host/connection replacements applied to every selected task
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    /// Replace each task's host member list (names, groups or addresses)
    pub with_hosts: Option<Vec<String>>,
    /// Replace each task's connection with a named one
    pub with_connection: Option<String>,
}

impl RunOverrides {
    pub fn is_empty(&self) -> bool {
        self.with_hosts.is_none() && self.with_connection.is_none()
    }
}

/// Aggregated outcome of a batch run.
///
/// `sum_exit_codes` is 0 while everything succeeds, 1 once any host exits
/// non-zero, -1 on a dispatch-level failure; once non-zero it is never
/// reset. `results` holds one group per dispatched selector.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub sum_exit_codes: i32,
    pub results: Vec<Vec<TaskResult>>,
}

impl RunReport {
    fn new() -> Self {
        RunReport {
            sum_exit_codes: 0,
            results: Vec::new(),
        }
    }

    fn absorb(&mut self, code: i32) {
        if self.sum_exit_codes == 0 {
            self.sum_exit_codes = code;
        }
    }

    pub fn ok_count(&self) -> usize {
        self.results
            .iter()
            .flatten()
            .filter(|r| r.success())
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .flatten()
            .filter(|r| !r.success())
            .count()
    }
}

/// Runs compiled tasks against their resolved hosts.
///
/// All shared state is behind `Arc`s so the engine clones cheaply into
/// spawned work.
#[derive(Clone)]
pub struct Engine {
    ctx: Arc<AppContext>,
    tasks: Arc<TaskSet>,
    jobs: Arc<JobTracker>,
}

impl Engine {
    pub fn new(ctx: Arc<AppContext>, tasks: Arc<TaskSet>) -> Self {
        Engine {
            ctx,
            tasks,
            jobs: Arc::new(JobTracker::new()),
        }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    pub fn tasks(&self) -> &Arc<TaskSet> {
        &self.tasks
    }

    pub fn jobs(&self) -> &Arc<JobTracker> {
        &self.jobs
    }

    /// Execute one task across its resolved hosts, sequentially and in
    /// resolved-list order. Every per-host outcome becomes a result record;
    /// nothing propagates as an error.
    pub async fn run(&self, task: &Task, host_filter: &[String], verbose: bool) -> Vec<TaskResult> {
        let mut results = Vec::new();
        for host in &task.connection.hosts {
            if !host_filter.is_empty() && !host_filter.iter().any(|id| id == &host.id) {
                continue;
            }
            results.push(self.run_on_host(task, host, verbose).await);
        }
        results
    }

    async fn run_on_host(&self, task: &Task, host: &Host, verbose: bool) -> TaskResult {
        match self.invoke(task, host, verbose).await {
            Ok(ret) => {
                TaskResult::from_return(task.id.as_str(), task.connection.id.as_str(), host.id.as_str(), ret)
            }
            // a failed command is still a result, with its real exit status
            Err(AutomateError::Command {
                command,
                stdout,
                stderr,
                exited,
                ..
            }) => TaskResult {
                task_id: task.id.clone(),
                connection_id: Some(task.connection.id.clone()),
                host_id: Some(host.id.clone()),
                stdout: Some(stdout),
                stderr: Some(stderr),
                command: Some(command),
                exited,
                values: None,
            },
            Err(err) => {
                self.ctx.logger.error(err.to_string());
                TaskResult::host_failure(
                    task.id.as_str(),
                    task.connection.id.as_str(),
                    host.id.as_str(),
                    err.to_string(),
                )
            }
        }
    }

    async fn invoke(
        &self,
        task: &Task,
        host: &Host,
        verbose: bool,
    ) -> Result<TaskReturn, AutomateError> {
        let connection = open_connection(&task.connection, host)?;
        let fut = task
            .handler
            .run(self.ctx.as_ref(), connection.as_connection(), verbose, &task.kwargs);

        match task.timeout {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), fut).await {
                Ok(ret) => ret,
                Err(_) => Err(AutomateError::Timeout {
                    task_id: task.id.clone(),
                    host: host.id.clone(),
                    duration_secs: secs,
                }),
            },
            None => fut.await,
        }
    }

    /// Execute selectors strictly in order, stopping after the first
    /// selector with a non-zero outcome unless `continue_on_error` is set.
    pub async fn run_sequential(
        &self,
        selectors: &[String],
        continue_on_error: bool,
        verbose: bool,
        overrides: &RunOverrides,
        opts: &ReportOptions,
    ) -> RunReport {
        let mut report = RunReport::new();

        for raw in selectors {
            if report.sum_exit_codes != 0 && !continue_on_error {
                break;
            }

            let selector = Selector::parse(raw);
            match self.prepare(&selector, overrides) {
                Ok(task) => {
                    let results = self.run(&task, &selector.host_filter(), verbose).await;
                    self.fold_group(&mut report, results, opts);
                }
                Err(err) => self.fold_error(&mut report, &selector.task_id, err, opts),
            }
        }

        report
    }

    /// Execute selectors concurrently on a bounded worker pool.
    ///
    /// All selectors are submitted up front; a dispatch failure never blocks
    /// the other submissions. Results fold in completion order.
    pub async fn run_threaded(
        &self,
        max_workers: usize,
        selectors: &[String],
        verbose: bool,
        overrides: &RunOverrides,
        opts: &ReportOptions,
    ) -> RunReport {
        let mut report = RunReport::new();
        let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
        let mut inflight = FuturesUnordered::new();

        for raw in selectors {
            let selector = Selector::parse(raw);
            match self.prepare(&selector, overrides) {
                Ok(task) => {
                    let engine = self.clone();
                    let semaphore = semaphore.clone();
                    let filter = selector.host_filter();
                    let task_id = selector.task_id.clone();
                    let handle = tokio::spawn(async move {
                        let _permit = semaphore.acquire_owned().await.unwrap();
                        engine.run(&task, &filter, verbose).await
                    });
                    inflight.push(async move { (task_id, handle.await) });
                }
                Err(err) => self.fold_error(&mut report, &selector.task_id, err, opts),
            }
        }

        while let Some((task_id, joined)) = inflight.next().await {
            match joined {
                Ok(results) => self.fold_group(&mut report, results, opts),
                Err(err) => self.fold_error(
                    &mut report,
                    &task_id,
                    AutomateError::Task {
                        task_id: task_id.clone(),
                        host: String::new(),
                        message: format!("Execution aborted: {}", err),
                    },
                    opts,
                ),
            }
        }

        report
    }

    /// Fire-and-forget execution of one task on a background job
    pub fn run_background(&self, task: Arc<Task>, verbose: bool) -> JobId {
        let engine = self.clone();
        let jobs = self.jobs.clone();
        let id = jobs.begin(&task.id);

        tokio::spawn(async move {
            let results = engine.run(&task, &[], verbose).await;
            let failed = results.iter().filter(|r| !r.success()).count();
            jobs.finish(id, results.len() - failed, failed);
        });

        id
    }

    /// Look up a selector's task, applying any host/connection overrides
    /// by re-resolving through the topology
    fn prepare(
        &self,
        selector: &Selector,
        overrides: &RunOverrides,
    ) -> Result<Arc<Task>, AutomateError> {
        let task = self.tasks.get(&selector.task_id)?;
        if overrides.is_empty() {
            return Ok(task);
        }

        let topology = self.tasks.topology();
        let mut connection = task.connection.clone();

        if let Some(conn_id) = &overrides.with_connection {
            connection = topology.resolve_connection(ConnectionConfig {
                use_id: Some(conn_id.clone()),
                ..ConnectionConfig::default()
            })?;
        }

        if let Some(hosts) = &overrides.with_hosts {
            let mut spec = connection.settings.clone();
            spec.id = Some(connection.id.clone());
            spec.name = Some(connection.name.clone());
            spec.hosts = Some(hosts.clone());
            connection = topology.resolve_connection(spec)?;
        }

        let mut task = (*task).clone();
        task.connection = connection;
        Ok(Arc::new(task))
    }

    fn fold_group(&self, report: &mut RunReport, results: Vec<TaskResult>, opts: &ReportOptions) {
        let mut group = Vec::new();
        for mut result in results {
            if !result.success() {
                report.absorb(1);
            }
            if opts.collect_results {
                if !opts.include_outputs {
                    result.strip_outputs();
                }
                group.push(result);
            }
        }
        if !group.is_empty() {
            report.results.push(group);
        }
    }

    fn fold_error(
        &self,
        report: &mut RunReport,
        task_id: &str,
        err: AutomateError,
        opts: &ReportOptions,
    ) {
        self.ctx.logger.error(err.to_string());
        report.absorb(-1);
        if opts.collect_results {
            report
                .results
                .push(vec![TaskResult::dispatch_failure(task_id, err.to_string())]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutomateConfig;
    use crate::executor::{CommandOutput, JobStatus};
    use crate::output::terminal::Logger;
    use crate::tasks::TaskRegistry;
    use crate::topology::Topology;

    fn failing_output(command: &str) -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: "expected failure".to_string(),
            command: command.to_string(),
            exited: 1,
        }
    }

    fn engine(extra_tasks: &str) -> Engine {
        let yaml = format!(
            r#"
tasks:
  module: testmod
{}
"#,
            extra_tasks
        );
        let config = Arc::new(
            AutomateConfig::from_value(serde_yaml::from_str(&yaml).unwrap()).unwrap(),
        );

        let mut registry = TaskRegistry::new();
        registry.register_fn("testmod", "ok", |_ctx, _conn, _verbose, _kwargs| {
            Box::pin(async { Ok(TaskReturn::values(serde_json::json!({"done": true}))) })
        });
        registry.register_fn("testmod", "fail", |_ctx, _conn, _verbose, _kwargs| {
            Box::pin(async { Ok(TaskReturn::from(failing_output("false"))) })
        });
        registry.register_fn("testmod", "boom", |_ctx, _conn, _verbose, _kwargs| {
            Box::pin(async {
                Err(AutomateError::Task {
                    task_id: "boom".to_string(),
                    host: "local".to_string(),
                    message: "handler exploded".to_string(),
                })
            })
        });
        registry.register_fn("testmod", "sleepy", |_ctx, _conn, _verbose, _kwargs| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(TaskReturn::values(serde_json::Value::Null))
            })
        });

        let topology = Arc::new(Topology::new(config.clone()));
        let tasks = Arc::new(TaskSet::new(
            config.clone(),
            topology,
            Arc::new(registry),
        ));
        let ctx = Arc::new(AppContext::new(config, Arc::new(Logger::new(false))));
        Engine::new(ctx, tasks)
    }

    fn selectors(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!(
            Selector::parse("task1"),
            Selector {
                task_id: "task1".to_string(),
                host_id: None
            }
        );
        assert_eq!(
            Selector::parse("task1:host2"),
            Selector {
                task_id: "task1".to_string(),
                host_id: Some("host2".to_string())
            }
        );
        assert_eq!(Selector::parse("task1:").host_id, None);
    }

    #[tokio::test]
    async fn test_run_collects_per_host_results() {
        let engine = engine("  ok: {}\n");
        let task = engine.tasks().get("ok").unwrap();
        let results = engine.run(&task, &[], false).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].host_id.as_deref(), Some("local"));
        assert_eq!(results[0].exited, 0);
        assert_eq!(
            results[0].values,
            Some(serde_json::json!({"done": true}))
        );
    }

    #[tokio::test]
    async fn test_run_host_filter() {
        let engine = engine("  ok: {}\n");
        let task = engine.tasks().get("ok").unwrap();

        let hit = engine.run(&task, &["local".to_string()], false).await;
        assert_eq!(hit.len(), 1);

        let miss = engine.run(&task, &["elsewhere".to_string()], false).await;
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn test_handler_error_folds_into_result() {
        let engine = engine("  boom: {}\n");
        let task = engine.tasks().get("boom").unwrap();
        let results = engine.run(&task, &[], false).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].exited, -1);
        assert!(results[0].stderr.as_deref().unwrap().contains("handler exploded"));
    }

    #[tokio::test]
    async fn test_sequential_stops_on_first_failure() {
        let engine = engine("  ok: {}\n  fail: {}\n");
        let report = engine
            .run_sequential(
                &selectors(&["fail", "ok", "ok"]),
                false,
                false,
                &RunOverrides::default(),
                &ReportOptions::collected(),
            )
            .await;

        assert_eq!(report.sum_exit_codes, 1);
        assert_eq!(report.results.len(), 1);
    }

    #[tokio::test]
    async fn test_sequential_continue_on_error_runs_all() {
        let engine = engine("  ok: {}\n  fail: {}\n");
        let report = engine
            .run_sequential(
                &selectors(&["fail", "ok", "ok"]),
                true,
                false,
                &RunOverrides::default(),
                &ReportOptions::collected(),
            )
            .await;

        assert_eq!(report.sum_exit_codes, 1);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.ok_count(), 2);
        assert_eq!(report.failed_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_task_is_dispatch_failure() {
        let engine = engine("  ok: {}\n");
        let report = engine
            .run_sequential(
                &selectors(&["ghost", "ok"]),
                false,
                false,
                &RunOverrides::default(),
                &ReportOptions::collected(),
            )
            .await;

        // dispatch failure stops the batch without continue_on_error
        assert_eq!(report.sum_exit_codes, -1);
        assert_eq!(report.results.len(), 1);
        let synthetic = &report.results[0][0];
        assert_eq!(synthetic.exited, -1);
        assert_eq!(synthetic.command.as_deref(), Some("automate run ghost"));
    }

    #[tokio::test]
    async fn test_exit_code_is_never_reset() {
        let engine = engine("  ok: {}\n  fail: {}\n");
        let report = engine
            .run_sequential(
                &selectors(&["ghost", "fail", "ok"]),
                true,
                false,
                &RunOverrides::default(),
                &ReportOptions::collected(),
            )
            .await;

        // -1 from the dispatch failure survives the later host failure
        assert_eq!(report.sum_exit_codes, -1);
        assert_eq!(report.results.len(), 3);
    }

    #[tokio::test]
    async fn test_threaded_run_collects_all_groups() {
        let engine = engine("  ok: {}\n  fail: {}\n");
        let report = engine
            .run_threaded(
                2,
                &selectors(&["ok", "fail", "ok"]),
                false,
                &RunOverrides::default(),
                &ReportOptions::collected(),
            )
            .await;

        assert_eq!(report.sum_exit_codes, 1);
        assert_eq!(report.results.len(), 3);
    }

    #[tokio::test]
    async fn test_threaded_dispatch_failure_does_not_block_others() {
        let engine = engine("  ok: {}\n");
        let report = engine
            .run_threaded(
                4,
                &selectors(&["ghost", "ok"]),
                false,
                &RunOverrides::default(),
                &ReportOptions::collected(),
            )
            .await;

        assert_eq!(report.sum_exit_codes, -1);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.ok_count(), 1);
    }

    #[tokio::test]
    async fn test_without_outputs_strips_streams() {
        let engine = engine("  fail: {}\n");
        let report = engine
            .run_sequential(
                &selectors(&["fail"]),
                false,
                false,
                &RunOverrides::default(),
                &ReportOptions {
                    collect_results: true,
                    include_outputs: false,
                },
            )
            .await;

        let result = &report.results[0][0];
        assert_eq!(result.stdout, None);
        assert_eq!(result.stderr, None);
        assert_eq!(result.exited, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_folds_into_failed_result() {
        let engine = engine("  sleepy:\n    timeout: 1\n");
        let task = engine.tasks().get("sleepy").unwrap();
        let results = engine.run(&task, &[], false).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].exited, -1);
        assert!(results[0].stderr.as_deref().unwrap().contains("exceeded 1s"));
    }

    #[tokio::test]
    async fn test_run_background_tracks_job() {
        let engine = engine("  ok: {}\n");
        let task = engine.tasks().get("ok").unwrap();
        let id = engine.run_background(task, false);

        // poll until the spawned job finishes
        for _ in 0..100 {
            if engine.jobs().status(id) != Some(JobStatus::Running) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            engine.jobs().status(id),
            Some(JobStatus::Finished { ok: 1, failed: 0 })
        );
    }
}
