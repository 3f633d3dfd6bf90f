//! Tracing subscriber setup.

use crate::config::EngineConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_FILE_PREFIX: &str = "bugtrail.log";

/// Installs the global subscriber: an `EnvFilter` (default `info`, `RUST_LOG`
/// overrides), a console layer and, when `log_dir` is configured, a daily
/// rolling file.
///
/// Hold the returned guard for the lifetime of the process so buffered file
/// output is flushed. A second call leaves the first subscriber in place.
pub fn init_logging(config: &EngineConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init();

    match result {
        Ok(()) => {
            tracing::info!(
                "[Logging] Initialized (file output: {})",
                config
                    .log_dir
                    .as_ref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_else(|| "disabled".to_string())
            );
            guard
        }
        Err(_) => {
            tracing::debug!("[Logging] Global subscriber already set");
            None
        }
    }
}
