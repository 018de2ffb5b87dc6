mod cli;
mod commands;
mod config;
mod logging;
mod render;
mod runner;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use colored::Colorize;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbosity = cli.verbosity();

    let args = match cli.command {
        Commands::Completion(args) => {
            clap_complete::generate(
                args.shell,
                &mut <Cli as clap::CommandFactory>::command(),
                "echelon",
                &mut std::io::stdout(),
            );
            return Ok(());
        }
        Commands::Run(args) => args,
    };

    let log_guard = logging::init(&std::env::temp_dir(), verbosity);
    let result = commands::run::run(args, verbosity).await;
    // Flush buffered log records before any early exit.
    drop(log_guard);

    match result {
        Ok(summary) if summary.is_success() => Ok(()),
        Ok(_) => std::process::exit(1),
        Err(e) => {
            eprintln!("\n{} {:#}", "FAILED".red().bold(), e);
            std::process::exit(1);
        }
    }
}
