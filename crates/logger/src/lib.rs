use std::env::var;
use std::path::PathBuf;

use tracing::{level_filters::LevelFilter, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError,
};

/// Where log output goes besides the console.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Directory for the rolling log file. `None` disables file output.
    pub directory: Option<PathBuf>,
    pub file_name: String,
}

impl LogOptions {
    pub fn console_only() -> Self {
        Self { directory: None, file_name: String::new() }
    }

    pub fn with_file(directory: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self { directory: Some(directory.into()), file_name: file_name.into() }
    }
}

/// Initialize tracing with an INFO default level.
///
/// The returned guard flushes the file writer when dropped, so callers keep it
/// alive for the lifetime of the process.
pub fn init(options: &LogOptions) -> Result<Option<WorkerGuard>, TryInitError> {
    initialize_tracing(LevelFilter::INFO, options)
}

fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder().with_default_directive(level.into()).from_env_lossy()
}

fn initialize_tracing(
    level: LevelFilter,
    options: &LogOptions,
) -> Result<Option<WorkerGuard>, TryInitError> {
    let log_format = var("RUST_LOG_FORMAT")
        .inspect_err(|error| {
            warn!("Failed to read RUST_LOG_FORMAT, falling back to default: {error}")
        })
        .unwrap_or_default();

    let console_layer = match log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer().json().with_filter(env_filter(level)).boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(true)
            .with_filter(env_filter(level))
            .boxed(),
    };

    let (file_layer, guard) = match &options.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &options.file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter(level));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry().with(console_layer).with(file_layer).try_init()?;

    Ok(guard)
}
