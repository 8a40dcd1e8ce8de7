use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "mastery.log";

/// Installs the global subscriber: stdout always, plus a daily-rotated file
/// under `log_dir` when one is given.
///
/// Hold the returned guard until exit; dropping it stops the file writer.
pub fn init_tracing(level: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_writer, file_error) = match log_dir.map(open_log_writer).transpose() {
        Ok(writer) => (writer, None),
        Err(err) => (None, Some(err)),
    };
    let (writer, guard) = file_writer.unzip();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(writer.map(|w| fmt::layer().with_writer(w).with_ansi(false)))
        .init();

    if let (Some(dir), Some(err)) = (log_dir, file_error) {
        tracing::warn!(dir = %dir.display(), error = %err, "file logging disabled");
    }
    guard
}

fn open_log_writer(dir: &Path) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    Ok(tracing_appender::non_blocking(rolling::daily(dir, LOG_FILE_PREFIX)))
}

/// `LOG_DIR` (default `./logs`) when `ENABLE_FILE_LOGS` is `true` or `1`.
pub fn log_dir_from_env() -> Option<PathBuf> {
    let enabled = std::env::var("ENABLE_FILE_LOGS")
        .map(|v| matches!(v.as_str(), "true" | "1"))
        .unwrap_or(false);
    enabled.then(|| {
        std::env::var("LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./logs"))
    })
}
