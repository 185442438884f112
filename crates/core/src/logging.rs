//! Tracing bootstrap for the rubberduck binary.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Where log output goes.
pub enum LogOutput {
    /// Human-readable output on stderr (the default).
    Stderr,
    /// Daily-rotated files under the given directory.
    File { dir: String },
}

/// Initialize the tracing subscriber. `RUST_LOG` wins over `level` when set.
///
/// Returns a `WorkerGuard` for file output that must be held for the
/// process lifetime so buffered lines are flushed on shutdown.
pub fn init_logging(level: &str, output: LogOutput) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match output {
        LogOutput::Stderr => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
            None
        }
        LogOutput::File { dir } => {
            let file_appender = tracing_appender::rolling::daily(dir, "rubberduck.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();

            Some(guard)
        }
    }
}
