use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::Verbosity;

/// Prefix of the daily log files; the appender adds `.YYYY-MM-DD`.
const LOG_FILE_PREFIX: &str = "echelon.log";

fn file_appender(dir: &Path) -> RollingFileAppender {
    tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX)
}

/// Initialize file-based logging with daily log rotation.
///
/// Logs are written to `echelon.log.YYYY-MM-DD` under `dir` (see [`file_appender`]), never to the
/// terminal, so they cannot tear the live tree. The level defaults to `info`
/// (`debug` with `--verbose`) and can be overridden via the `ECHELON_LOG` or
/// `RUST_LOG` environment variables.
///
/// Returns a [`WorkerGuard`] that **must** be held for the lifetime of the program
/// to ensure buffered log records are flushed on shutdown.
pub fn init(dir: &Path, verbosity: Verbosity) -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender(dir));

    let default_level = match verbosity {
        Verbosity::Verbose => "debug",
        Verbosity::Normal | Verbosity::Quiet => "info",
    };
    let env_filter = EnvFilter::try_from_env("ECHELON_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true),
        )
        .with(env_filter)
        .init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_log_file_is_dated() {
        let dir = tempfile::tempdir().unwrap();
        let mut appender = file_appender(dir.path());
        writeln!(appender, "hello").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        let date = names[0].strip_prefix("echelon.log.").expect("dated log file");
        assert_eq!(date.len(), "YYYY-MM-DD".len());
        assert_eq!(date.matches('-').count(), 2);
    }
}
