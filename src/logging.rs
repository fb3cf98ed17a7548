use std::fs;
use std::path::Path;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::Subscriber;
use tracing_subscriber::EnvFilter;

use crate::errors::{PatchOpsError, Result};

const LOG_FILE_NAME: &str = "patchops.log";

static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Installs the global subscriber. Warnings and errors are mirrored to
/// stderr when `console` is set so the CLI shell can show them.
pub fn init(log_dir: &Path, console: bool) -> Result<()> {
    fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_level = if console {
        tracing::Level::WARN
    } else {
        tracing::Level::ERROR
    };

    let subscriber = Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(non_blocking.and(std::io::stderr.with_max_level(stderr_level)))
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| PatchOpsError::Config(err.to_string()))?;

    Ok(())
}
