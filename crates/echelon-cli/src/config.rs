use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Task file looked up in the current directory when no commands are given.
pub const DEFAULT_TASK_FILE: &str = "echelon.yaml";

/// Root title used when the task file does not name the run.
pub const DEFAULT_RUN_NAME: &str = "echelon";

/// Parsed `echelon.yaml`.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskFile {
    /// Title of the root node
    #[serde(default)]
    pub name: Option<String>,

    /// Maximum number of commands running at once (CLI `--concurrency` wins)
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Skip tasks that have not started once any task fails
    #[serde(default)]
    pub fail_fast: Option<bool>,

    /// Per-command timeout in seconds (0 = no timeout)
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Output lines kept per task
    #[serde(default)]
    pub max_description_lines: Option<usize>,

    /// Run top-level tasks concurrently (default) or one after another
    #[serde(default)]
    pub parallel: Option<bool>,

    /// Environment variables applied to every task
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// One entry of the task tree: a shell command or a group of tasks.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    pub name: String,

    /// Shell command (leaf task)
    #[serde(default)]
    pub run: Option<String>,

    /// Nested tasks (group)
    #[serde(default)]
    pub tasks: Option<Vec<TaskConfig>>,

    /// Whether a group's tasks run concurrently; ignored for leaves
    #[serde(default = "default_parallel")]
    pub parallel: bool,

    /// Working directory, relative to the task file directory.
    /// Inherited by nested tasks unless they set their own.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables, inherited by nested tasks
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_parallel() -> bool {
    true
}

/// What a validated task does.
#[derive(Debug, Clone, Copy)]
pub enum TaskKind<'a> {
    Command(&'a str),
    Group(&'a [TaskConfig]),
}

impl TaskConfig {
    /// A leaf task named after its own command.
    pub fn command(run: &str) -> Self {
        Self {
            name: run.to_string(),
            run: Some(run.to_string()),
            tasks: None,
            parallel: true,
            cwd: None,
            env: HashMap::new(),
        }
    }

    /// `None` when the task has both or neither of `run` and `tasks`.
    pub fn kind(&self) -> Option<TaskKind<'_>> {
        match (&self.run, &self.tasks) {
            (Some(run), None) => Some(TaskKind::Command(run)),
            (None, Some(tasks)) => Some(TaskKind::Group(tasks)),
            _ => None,
        }
    }

    /// Number of shell commands in this subtree.
    pub fn command_count(&self) -> usize {
        match self.kind() {
            Some(TaskKind::Command(_)) => 1,
            Some(TaskKind::Group(tasks)) => tasks.iter().map(TaskConfig::command_count).sum(),
            None => 0,
        }
    }

    fn validate_into(&self, path: &str, problems: &mut Vec<String>) {
        let path = if path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", path, self.name)
        };

        if self.name.trim().is_empty() {
            problems.push(format!("Task '{}' has an empty name", path));
        }

        match (&self.run, &self.tasks) {
            (Some(_), Some(_)) => {
                problems.push(format!("Task '{}' has both `run` and `tasks`", path));
            }
            (None, None) => {
                problems.push(format!("Task '{}' needs either `run` or `tasks`", path));
            }
            (Some(run), None) => {
                if run.trim().is_empty() {
                    problems.push(format!("Task '{}' has an empty `run` command", path));
                }
            }
            (None, Some(tasks)) => {
                if tasks.is_empty() {
                    problems.push(format!("Group '{}' has no tasks", path));
                }
                for task in tasks {
                    task.validate_into(&path, problems);
                }
            }
        }
    }
}

impl TaskFile {
    /// Build an ad-hoc task file with one leaf task per command.
    pub fn from_commands(commands: &[String]) -> Self {
        Self {
            tasks: commands.iter().map(|c| TaskConfig::command(c)).collect(),
            ..Self::default()
        }
    }

    /// Find the task file to use: an explicit path, or `echelon.yaml` in `dir`.
    pub fn locate(explicit: Option<&Path>, dir: &Path) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        let candidate = dir.join(DEFAULT_TASK_FILE);
        if candidate.is_file() {
            Ok(candidate)
        } else {
            anyhow::bail!(
                "No commands given and no {} found in {}",
                DEFAULT_TASK_FILE,
                dir.display()
            )
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        let file: TaskFile = yaml_serde::from_str(yaml)?;
        Ok(file)
    }

    /// Collect every problem in the file rather than stopping at the first.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.tasks.is_empty() {
            problems.push("No tasks defined".to_string());
        }
        if self.concurrency == Some(0) {
            problems.push("`concurrency` must be at least 1".to_string());
        }
        for task in &self.tasks {
            task.validate_into("", &mut problems);
        }
        problems
    }

    pub fn run_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_RUN_NAME)
    }

    pub fn command_count(&self) -> usize {
        self.tasks.iter().map(TaskConfig::command_count).sum()
    }
}
