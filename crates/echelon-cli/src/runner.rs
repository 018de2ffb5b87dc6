use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use echelon_core::{AnsiColor, StatusNode};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{TaskConfig, TaskKind};

const SUCCESS_COLOR: AnsiColor = AnsiColor::Green;
const FAILURE_COLOR: AnsiColor = AnsiColor::Red;
const SKIPPED_COLOR: AnsiColor = AnsiColor::Yellow;

/// Return the platform-appropriate shell executable and flag for running commands.
///
/// On Windows, returns `("cmd", "/C")` to invoke `cmd.exe /C <command>`.
/// On Unix-like systems, returns `("sh", "-c")` to invoke `sh -c <command>`.
pub fn shell_command() -> (&'static str, &'static str) {
    if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}

/// Settings shared by every task of one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum commands running at once
    pub concurrency: usize,
    /// Skip tasks that have not started once any task fails
    pub fail_fast: bool,
    /// Kill a command after this long
    pub timeout: Option<Duration>,
    /// Output lines kept per node
    pub max_description_lines: usize,
    /// Directory relative `cwd` values resolve against; exported as `ECHELON_ROOT_PATH`
    pub root_path: PathBuf,
    /// Environment applied to every task
    pub env: HashMap<String, String>,
}

/// Command counts after a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Where a task sits in the tree and what it inherits from its groups.
#[derive(Debug, Clone)]
struct Scope {
    path: Vec<String>,
    cwd: PathBuf,
    env: HashMap<String, String>,
}

impl Scope {
    fn root(options: &RunOptions) -> Self {
        Self {
            path: Vec::new(),
            cwd: options.root_path.clone(),
            env: options.env.clone(),
        }
    }

    /// Scope for `task` nested in `self`: its name is appended to the path,
    /// its `cwd` replaces the inherited one and its `env` overrides inherited keys.
    fn enter(&self, task: &TaskConfig, root_path: &Path) -> Self {
        let mut path = self.path.clone();
        path.push(task.name.clone());

        let cwd = match &task.cwd {
            Some(dir) => root_path.join(dir),
            None => self.cwd.clone(),
        };

        let mut env = self.env.clone();
        env.extend(task.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        Self { path, cwd, env }
    }

    fn path_string(&self) -> String {
        self.path.join("/")
    }

    /// Environment for a command: inherited vars plus the echelon task vars.
    fn command_env(&self, root_path: &Path) -> HashMap<String, String> {
        let mut env = self.env.clone();
        env.insert(
            "ECHELON_TASK_NAME".to_string(),
            self.path.last().cloned().unwrap_or_default(),
        );
        env.insert("ECHELON_TASK_PATH".to_string(), self.path_string());
        env.insert(
            "ECHELON_ROOT_PATH".to_string(),
            root_path.display().to_string(),
        );
        env
    }
}

struct RunContext {
    options: RunOptions,
    semaphore: Semaphore,
    failed: AtomicBool,
    succeeded_count: AtomicUsize,
    failed_count: AtomicUsize,
    skipped_count: AtomicUsize,
}

impl RunContext {
    fn should_skip(&self) -> bool {
        self.options.fail_fast && self.failed.load(Ordering::Relaxed)
    }

    fn record(&self, success: bool) {
        if success {
            self.succeeded_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_count.fetch_add(1, Ordering::Relaxed);
            self.failed.store(true, Ordering::Relaxed);
        }
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            succeeded: self.succeeded_count.load(Ordering::Relaxed),
            failed: self.failed_count.load(Ordering::Relaxed),
            skipped: self.skipped_count.load(Ordering::Relaxed),
        }
    }
}

type TaskFuture = Pin<Box<dyn Future<Output = Result<bool>> + Send>>;

/// Runs a task tree, mirroring every task as a child node of the given root.
///
/// Commands are bounded by a shared semaphore no matter how deeply they are
/// nested. A task's node is started when the task actually begins, so queued
/// time is not counted in its duration.
pub struct TaskRunner {
    options: RunOptions,
}

impl TaskRunner {
    pub fn new(mut options: RunOptions) -> Self {
        options.concurrency = options.concurrency.max(1);
        Self { options }
    }

    /// Run `tasks` under `root`. The root node itself is left running;
    /// completing it is up to the caller.
    pub async fn run(&self, root: &StatusNode, tasks: Vec<TaskConfig>, parallel: bool) -> Result<RunSummary> {
        let ctx = Arc::new(RunContext {
            semaphore: Semaphore::new(self.options.concurrency),
            options: self.options.clone(),
            failed: AtomicBool::new(false),
            succeeded_count: AtomicUsize::new(0),
            failed_count: AtomicUsize::new(0),
            skipped_count: AtomicUsize::new(0),
        });

        let scope = Scope::root(&ctx.options);
        run_group(tasks, parallel, root.clone(), scope, Arc::clone(&ctx)).await?;

        let summary = ctx.summary();
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "run finished"
        );
        Ok(summary)
    }
}

fn run_group(
    tasks: Vec<TaskConfig>,
    parallel: bool,
    parent: StatusNode,
    scope: Scope,
    ctx: Arc<RunContext>,
) -> TaskFuture {
    Box::pin(async move {
        if parallel {
            let handles: Vec<JoinHandle<Result<bool>>> = tasks
                .into_iter()
                .map(|task| {
                    tokio::spawn(run_task(
                        task,
                        parent.clone(),
                        scope.clone(),
                        Arc::clone(&ctx),
                    ))
                })
                .collect();

            let mut all_ok = true;
            for handle in handles {
                all_ok &= handle.await.context("Task panicked")??;
            }
            Ok(all_ok)
        } else {
            let mut tasks = tasks.into_iter();
            let mut all_ok = true;
            for task in tasks.by_ref() {
                all_ok = run_task(task, parent.clone(), scope.clone(), Arc::clone(&ctx)).await?;
                if !all_ok {
                    break;
                }
            }
            // Steps after a failure never start.
            for task in tasks {
                skip_task(&task, &parent, &ctx)?;
            }
            Ok(all_ok)
        }
    })
}

fn run_task(task: TaskConfig, parent: StatusNode, scope: Scope, ctx: Arc<RunContext>) -> TaskFuture {
    Box::pin(async move {
        if ctx.should_skip() {
            skip_task(&task, &parent, &ctx)?;
            return Ok(false);
        }

        let scope = scope.enter(&task, &ctx.options.root_path);
        let Some(kind) = task.kind() else {
            anyhow::bail!("Task '{}' needs exactly one of `run` or `tasks`", scope.path_string());
        };

        match kind {
            TaskKind::Group(children) => {
                let node = StatusNode::start_with_max_lines(&task.name, ctx.options.max_description_lines);
                parent.add_child(node.clone());
                debug!(task = %scope.path_string(), "group started");

                let ok = run_group(
                    children.to_vec(),
                    task.parallel,
                    node.clone(),
                    scope,
                    Arc::clone(&ctx),
                )
                .await?;
                node.complete_with_color(if ok { SUCCESS_COLOR } else { FAILURE_COLOR })?;
                Ok(ok)
            }
            TaskKind::Command(command) => {
                let _permit = ctx
                    .semaphore
                    .acquire()
                    .await
                    .context("Task semaphore closed")?;

                // A failure may have happened while this task was queued.
                if ctx.should_skip() {
                    skip_task(&task, &parent, &ctx)?;
                    return Ok(false);
                }

                let node = StatusNode::start_with_max_lines(&task.name, ctx.options.max_description_lines);
                parent.add_child(node.clone());

                let started = Instant::now();
                info!(task = %scope.path_string(), command, "task started");
                let ok = run_command(command, &node, &scope, &ctx.options).await;
                info!(
                    task = %scope.path_string(),
                    success = ok,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "task finished"
                );

                ctx.record(ok);
                node.complete_with_color(if ok { SUCCESS_COLOR } else { FAILURE_COLOR })?;
                Ok(ok)
            }
        }
    })
}

/// Show a task that will not run as a completed yellow node.
fn skip_task(task: &TaskConfig, parent: &StatusNode, ctx: &RunContext) -> Result<()> {
    let node = StatusNode::start_with_max_lines(
        format!("{} (skipped)", task.name),
        ctx.options.max_description_lines,
    );
    parent.add_child(node.clone());
    node.complete_with_color(SKIPPED_COLOR)?;
    ctx.skipped_count
        .fetch_add(task.command_count(), Ordering::Relaxed);
    debug!(task = %task.name, "task skipped");
    Ok(())
}

/// Run one shell command, streaming its output into `node`'s description.
///
/// Returns whether the command exited successfully. Failures are reported on
/// the node (title suffix and description) rather than as errors.
async fn run_command(command: &str, node: &StatusNode, scope: &Scope, options: &RunOptions) -> bool {
    let (shell, shell_flag) = shell_command();
    let child = tokio::process::Command::new(shell)
        .arg(shell_flag)
        .arg(command)
        .current_dir(&scope.cwd)
        .envs(scope.command_env(&options.root_path))
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            warn!(command, error = %e, "failed to spawn command");
            node.append_description(format!("ERROR: {}", e));
            mark_failed(node, "failed to start");
            return false;
        }
    };

    let mut stdout_task = stream_lines(child.stdout.take(), node.clone());
    let mut stderr_task = stream_lines(child.stderr.take(), node.clone());

    // The deadline covers both the exit and the output drain.
    let deadline = options.timeout.map(|d| tokio::time::Instant::now() + d);
    let status = match deadline {
        Some(deadline) => {
            let waited = tokio::time::timeout_at(deadline, child.wait()).await;
            match waited {
                Ok(status) => Some(status),
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        warn!(command, error = %e, "failed to kill timed out command");
                    }
                    None
                }
            }
        }
        None => Some(child.wait().await),
    };

    match status {
        Some(Ok(status)) => {
            // Ensure all output is on the node before it completes.
            if !drain_output(&mut stdout_task, &mut stderr_task, deadline).await {
                warn!(command, "output still open at the deadline");
                mark_timed_out(node, options);
                return false;
            }
            if status.success() {
                true
            } else {
                let label = match status.code() {
                    Some(code) => format!("exit code {}", code),
                    None => "terminated by signal".to_string(),
                };
                mark_failed(node, &label);
                false
            }
        }
        Some(Err(e)) => {
            stdout_task.abort();
            stderr_task.abort();
            node.append_description(format!("ERROR: {}", e));
            mark_failed(node, "wait failed");
            false
        }
        None => {
            // Grandchildren may still hold the pipes open.
            stdout_task.abort();
            stderr_task.abort();
            mark_timed_out(node, options);
            false
        }
    }
}

/// Wait for both output streams to close. Background processes can keep the
/// pipes open after the shell exits, so past the deadline the streams are
/// aborted and `false` is returned.
async fn drain_output(
    stdout: &mut JoinHandle<()>,
    stderr: &mut JoinHandle<()>,
    deadline: Option<tokio::time::Instant>,
) -> bool {
    let Some(deadline) = deadline else {
        let _ = stdout.await;
        let _ = stderr.await;
        return true;
    };
    let both = async {
        let _ = (&mut *stdout).await;
        let _ = (&mut *stderr).await;
    };
    if tokio::time::timeout_at(deadline, both).await.is_ok() {
        return true;
    }
    stdout.abort();
    stderr.abort();
    false
}

fn mark_timed_out(node: &StatusNode, options: &RunOptions) {
    let secs = options.timeout.map(|d| d.as_secs_f64()).unwrap_or_default();
    node.append_description(format!("TIMEOUT: timed out after {}s", secs));
    mark_failed(node, "timed out");
}

fn mark_failed(node: &StatusNode, reason: &str) {
    let title = node.title();
    node.update_title(format!("{} ({})", title, reason));
}

fn stream_lines<R>(reader: Option<R>, node: StatusNode) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(reader) = reader else {
            return;
        };
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            node.append_description(line.trim_end_matches('\r'));
        }
    })
}
