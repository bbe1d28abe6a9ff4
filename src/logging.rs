//! Centralized logging setup.
//!
//! Logs to both stdout (for container logs) and a daily-rolling file under
//! the configured log directory, matching the format used across the rest of
//! the deployment. `RUST_LOG` overrides the default filter.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

const LOG_FILE_NAME: &str = "webpilot.log";

/// Initialize the subscriber. The returned guard must stay alive for the
/// process lifetime or buffered file output is lost.
pub fn init(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "webpilot=info,tower_http=info".into());

    let stdout_layer = tracing_subscriber::fmt::layer();

    match std::fs::create_dir_all(&config.log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();

            tracing::info!(
                "Logging initialized (stdout + file: {})",
                config.log_dir.join(LOG_FILE_NAME).display()
            );
            Some(guard)
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .init();

            tracing::warn!(
                "Could not create log directory {}: {}; logging to stdout only",
                config.log_dir.display(),
                e
            );
            None
        }
    }
}
