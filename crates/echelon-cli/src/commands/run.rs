use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use echelon_core::{AnsiColor, DEFAULT_MAX_DESCRIPTION_LINES, StatusNode};
use tracing::info;

use crate::cli::Verbosity;
use crate::config::TaskFile;
use crate::render::{RenderMode, spawn_renderer};
use crate::runner::{RunOptions, RunSummary, TaskRunner};

/// Default number of commands running at once
const DEFAULT_CONCURRENCY: usize = 5;

/// Arguments for the `run` command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Commands to run, one task each (reads the task file when empty)
    #[arg(trailing_var_arg = true)]
    pub commands: Vec<String>,

    /// Task file to load instead of ./echelon.yaml
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Title of the root node (overrides the task file's `name`)
    #[arg(long)]
    pub name: Option<String>,

    /// Maximum number of concurrent commands
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// Skip tasks that have not started once any task fails
    #[arg(long)]
    pub fail_fast: bool,

    /// Keep running every task after a failure (overrides the task file's `failFast`)
    #[arg(long, conflicts_with = "fail_fast")]
    pub no_fail_fast: bool,

    /// Timeout per command in seconds (0 = no timeout)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Output lines kept per task
    #[arg(long)]
    pub max_lines: Option<usize>,

    /// Redraw interval of the live tree in milliseconds
    #[arg(long, default_value = "100")]
    pub refresh_ms: u64,

    /// Print the finished tree as JSON instead of drawing it
    #[arg(long, conflicts_with = "plain")]
    pub json: bool,

    /// Print the finished tree once instead of redrawing it live
    #[arg(long)]
    pub plain: bool,
}

/// A task file together with the directory its relative paths resolve against.
struct Plan {
    file: TaskFile,
    root_path: PathBuf,
}

fn load_plan(args: &RunArgs, cwd: &Path) -> Result<Plan> {
    if !args.commands.is_empty() {
        return Ok(Plan {
            file: TaskFile::from_commands(&args.commands),
            root_path: cwd.to_path_buf(),
        });
    }

    let path = TaskFile::locate(args.file.as_deref(), cwd)?;
    let file = TaskFile::load(&path)?;
    let root_path = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => cwd.to_path_buf(),
    };
    Ok(Plan { file, root_path })
}

/// CLI flags win over the task file, which wins over the defaults.
fn run_options(args: &RunArgs, plan: &Plan) -> RunOptions {
    let timeout_secs = args.timeout.or(plan.file.timeout).unwrap_or(0);
    RunOptions {
        concurrency: args
            .concurrency
            .or(plan.file.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY)
            .max(1),
        fail_fast: fail_fast_flag(args).or(plan.file.fail_fast).unwrap_or(false),
        timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        max_description_lines: args
            .max_lines
            .or(plan.file.max_description_lines)
            .unwrap_or(DEFAULT_MAX_DESCRIPTION_LINES),
        root_path: plan.root_path.clone(),
        env: plan.file.env.clone(),
    }
}

/// `Some` when either `--fail-fast` or `--no-fail-fast` was given.
fn fail_fast_flag(args: &RunArgs) -> Option<bool> {
    if args.fail_fast {
        Some(true)
    } else if args.no_fail_fast {
        Some(false)
    } else {
        None
    }
}

fn render_mode(args: &RunArgs) -> RenderMode {
    let colored = colored::control::SHOULD_COLORIZE.should_colorize();
    if args.json {
        RenderMode::Json
    } else if args.plain || !std::io::stdout().is_terminal() {
        RenderMode::Final { colored }
    } else {
        RenderMode::Live {
            interval: Duration::from_millis(args.refresh_ms.max(10)),
            colored,
        }
    }
}

/// Run the requested tasks, rendering progress until every task has finished.
pub async fn run(args: RunArgs, verbosity: Verbosity) -> Result<RunSummary> {
    let cwd = std::env::current_dir().context("Failed to resolve the current directory")?;
    let plan = load_plan(&args, &cwd)?;

    let problems = plan.file.validate();
    if !problems.is_empty() {
        anyhow::bail!("Invalid task file:\n  - {}", problems.join("\n  - "));
    }

    let options = run_options(&args, &plan);
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| plan.file.run_name().to_string());
    info!(
        name = %name,
        commands = plan.file.command_count(),
        concurrency = options.concurrency,
        "starting run"
    );

    let root = StatusNode::start_with_max_lines(&name, options.max_description_lines);
    let renderer = spawn_renderer(root.clone(), render_mode(&args));

    let parallel = plan.file.parallel.unwrap_or(true);
    let result = TaskRunner::new(options)
        .run(&root, plan.file.tasks, parallel)
        .await;

    let color = match &result {
        Ok(summary) if summary.is_success() => AnsiColor::Green,
        _ => AnsiColor::Red,
    };
    root.complete_with_color(color)?;
    renderer.await.context("Renderer task panicked")??;

    let summary = result?;
    if verbosity != Verbosity::Quiet && !args.json {
        print_summary(&summary);
    }
    Ok(summary)
}

fn print_summary(summary: &RunSummary) {
    if summary.is_success() {
        println!(
            "\n{} {} task(s) succeeded",
            "SUCCESS".green().bold(),
            summary.succeeded
        );
    } else {
        eprintln!(
            "\n{} {} of {} task(s) failed, {} skipped",
            "FAILED".red().bold(),
            summary.failed,
            summary.total(),
            summary.skipped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    use crate::cli::{Cli, Commands};

    fn parse_run(argv: &[&str]) -> RunArgs {
        let mut full = vec!["echelon", "run"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Commands::Run(args) => args,
            other => panic!("expected run, got {:?}", other),
        }
    }

    #[test]
    fn test_commands_after_separator() {
        let args = parse_run(&["-c", "2", "--", "echo a", "ls -la"]);
        assert_eq!(args.commands, vec!["echo a", "ls -la"]);
        assert_eq!(args.concurrency, Some(2));
    }

    #[test]
    fn test_json_conflicts_with_plain() {
        let result = Cli::try_parse_from(["echelon", "run", "--json", "--plain"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_plan_from_commands_uses_cwd() {
        let dir = TempDir::new().unwrap();
        let args = parse_run(&["--", "true"]);
        let plan = load_plan(&args, dir.path()).unwrap();
        assert_eq!(plan.root_path, dir.path());
        assert_eq!(plan.file.tasks.len(), 1);
    }

    #[test]
    fn test_plan_from_file_uses_file_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("ci");
        std::fs::create_dir(&nested).unwrap();
        let path = nested.join("tasks.yaml");
        std::fs::write(&path, "tasks:\n  - name: a\n    run: echo a\n").unwrap();

        let path_arg = path.display().to_string();
        let args = parse_run(&["--file", &path_arg]);
        let plan = load_plan(&args, dir.path()).unwrap();
        assert_eq!(plan.root_path, nested);
    }

    #[test]
    fn test_flags_override_file() {
        let file = TaskFile::parse(
            "concurrency: 3\ntimeout: 9\nmaxDescriptionLines: 7\nfailFast: true\ntasks: []\n",
        )
        .unwrap();
        let plan = Plan {
            file,
            root_path: PathBuf::from("/work"),
        };

        let from_file = run_options(&parse_run(&[]), &plan);
        assert_eq!(from_file.concurrency, 3);
        assert_eq!(from_file.timeout, Some(Duration::from_secs(9)));
        assert_eq!(from_file.max_description_lines, 7);
        assert!(from_file.fail_fast);

        let from_flags = run_options(
            &parse_run(&["-c", "1", "--timeout", "0", "--max-lines", "2"]),
            &plan,
        );
        assert_eq!(from_flags.concurrency, 1);
        assert_eq!(from_flags.timeout, None);
        assert_eq!(from_flags.max_description_lines, 2);
    }

    #[test]
    fn test_no_fail_fast_overrides_file() {
        let plan = Plan {
            file: TaskFile::parse("failFast: true\ntasks: []\n").unwrap(),
            root_path: PathBuf::from("/work"),
        };
        assert!(run_options(&parse_run(&[]), &plan).fail_fast);
        assert!(!run_options(&parse_run(&["--no-fail-fast"]), &plan).fail_fast);

        let off = Plan {
            file: TaskFile::parse("failFast: false\ntasks: []\n").unwrap(),
            root_path: PathBuf::from("/work"),
        };
        assert!(run_options(&parse_run(&["--fail-fast"]), &off).fail_fast);
    }

    #[test]
    fn test_fail_fast_flags_conflict() {
        let result =
            Cli::try_parse_from(["echelon", "run", "--fail-fast", "--no-fail-fast"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_render_mode_json_and_plain() {
        assert_eq!(render_mode(&parse_run(&["--json"])), RenderMode::Json);
        assert!(matches!(
            render_mode(&parse_run(&["--plain"])),
            RenderMode::Final { .. }
        ));
    }

    #[test]
    fn test_defaults_without_file_settings() {
        let plan = Plan {
            file: TaskFile::from_commands(&["true".to_string()]),
            root_path: PathBuf::from("/work"),
        };
        let options = run_options(&parse_run(&["-c", "0"]), &plan);
        assert_eq!(options.concurrency, 1);
        assert_eq!(options.timeout, None);
        assert_eq!(options.max_description_lines, DEFAULT_MAX_DESCRIPTION_LINES);
        assert!(!options.fail_fast);
    }
}
