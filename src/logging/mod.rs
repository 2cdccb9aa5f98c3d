pub mod cleanup;
pub mod config;
pub mod middleware;

use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub use config::LogConfig;
pub use middleware::{access_log_middleware, request_context_middleware, RequestId};

tokio::task_local! {
    /// Correlation id for the request being handled on this task
    pub static REQUEST_ID: String;
}

/// Request id for the current task, or `-` outside a request scope
pub fn current_request_id() -> String {
    REQUEST_ID
        .try_with(|id| id.clone())
        .unwrap_or_else(|_| "-".to_string())
}

/// Initialize the dual-stream logging system (console + file-based)
///
/// This sets up:
/// - Console logging for immediate visibility
/// - Access log file (JSON format) for HTTP request tracking
/// - Application log file (JSON format) for server events
/// - Daily rotation plus a background retention/compression task
pub fn init_logging(log_dir: &Path, config: &LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(log_dir.join("archives"))?;

    // Rolling file appenders; daily rotation names files with a date suffix
    let access_appender = tracing_appender::rolling::daily(log_dir, "access.log");
    let app_appender = tracing_appender::rolling::daily(log_dir, "backend_api.log");

    let (access_writer, access_guard) = tracing_appender::non_blocking(access_appender);
    let (app_writer, app_guard) = tracing_appender::non_blocking(app_appender);

    // Console layer - for immediate visibility during development/debugging
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.console_log_level)),
        );

    // Access log layer - JSON formatted, only events with target "access_log"
    let access_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(access_writer)
        .with_filter(
            EnvFilter::new("access_log=info").add_directive(tracing::Level::INFO.into()),
        );

    // Application log layer - JSON formatted, excludes access logs
    let app_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(app_writer)
        .with_filter(
            EnvFilter::new(&config.file_log_level).add_directive("access_log=off".parse()?),
        );

    tracing_subscriber::registry()
        .with(console_layer)
        .with(access_layer)
        .with(app_layer)
        .init();

    // Guards must live for the process lifetime or the log files close
    std::mem::forget(access_guard);
    std::mem::forget(app_guard);

    if config.enable_cleanup {
        tokio::spawn(cleanup::cleanup_task(log_dir.to_path_buf(), config.clone()));
        tracing::info!(
            retention_days = config.retention_days,
            max_total_size_mb = config.max_total_size_mb,
            "Log cleanup task started"
        );
    }

    tracing::info!(log_dir = %log_dir.display(), "Logging initialized");

    Ok(())
}

/// Log platform-specific information on startup
pub fn log_platform_info() {
    tracing::info!(
        platform = std::env::consts::OS,
        architecture = std::env::consts::ARCH,
        family = std::env::consts::FAMILY,
        "Server starting on platform"
    );
}
