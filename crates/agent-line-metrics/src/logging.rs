use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{
    EnvFilter,
    Layer,
    fmt,
};

use crate::consts::LOG_ENV_VAR;

/// Arguments to [initialize_logging].
#[derive(Debug, Default)]
pub struct LogArgs<'a> {
    /// Level used when the environment sets no filter.
    pub default_level: Option<LevelFilter>,
    /// Also write logs to this file.
    pub log_file: Option<&'a Path>,
}

/// Installs the global subscriber: stderr output, plus a non-blocking file writer when a log file
/// is requested. Keep the returned guard alive until exit or buffered file output is lost.
pub fn initialize_logging(args: LogArgs<'_>) -> Result<Option<WorkerGuard>, std::io::Error> {
    let default_level = args.default_level.unwrap_or(LevelFilter::WARN);
    let filter = || {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .with_env_var(LOG_ENV_VAR)
            .from_env_lossy()
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter());

    let (file_layer, guard) = match args.log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter());
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    // A subscriber may already be installed, e.g. by the embedding host.
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    Ok(guard)
}
