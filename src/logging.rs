//! Tracing subscriber setup.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Prefix of the daily log files written under the log directory.
pub const LOG_FILE_PREFIX: &str = "docforge.log";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `default_level`. Events go to stderr and, when
/// `log_dir` is given, to a daily-rolling file in that directory. The
/// returned guard flushes the file writer on drop and must be kept alive by
/// the caller.
pub fn init(default_level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    Registry::default()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
