use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber, logging to `file` when given and to
/// stdout otherwise.
///
/// The returned guard must be held until exit so buffered logs are flushed.
pub fn init(file: Option<&Path>) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rrdp=info"));
    let (writer, guard) = writer(file)?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_line_number(true)
                .with_ansi(file.is_none())
                .with_writer(writer),
        )
        .with(filter)
        .try_init()
        .context("Failed to install the log subscriber")?;

    Ok(guard)
}

fn writer(file: Option<&Path>) -> Result<(NonBlocking, WorkerGuard)> {
    let Some(file) = file else {
        return Ok(tracing_appender::non_blocking(std::io::stdout()));
    };
    let name = file
        .file_name()
        .with_context(|| format!("Log file has no file name: {}", file.display()))?;
    let dir = match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    let appender = tracing_appender::rolling::never(dir, name);
    Ok(tracing_appender::non_blocking(appender))
}
