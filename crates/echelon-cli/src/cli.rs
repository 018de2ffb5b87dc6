use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use crate::commands::run::RunArgs;

/// echelon: run shell tasks concurrently and watch them as a live progress tree
#[derive(Parser, Debug)]
#[command(name = "echelon", version, about, long_about = None)]
pub struct Cli {
    /// Increase output verbosity (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Verbosity level resolved from --verbose / --quiet flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// --quiet: only errors and the final tree
    Quiet,
    /// default: normal output
    Normal,
    /// --verbose: extra debug info
    Verbose,
}

impl Cli {
    /// Resolve the verbosity level from CLI flags
    pub fn verbosity(&self) -> Verbosity {
        match (self.quiet, self.verbose) {
            (true, _) => Verbosity::Quiet,
            (_, true) => Verbosity::Verbose,
            _ => Verbosity::Normal,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run commands (or an echelon.yaml task file) and render their progress
    Run(RunArgs),

    /// Generate shell completion scripts
    Completion(CompletionArgs),
}

/// Arguments for the `completion` command
#[derive(Args, Debug)]
pub struct CompletionArgs {
    /// The shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
