use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt::time::UtcTime, layer::Identity, prelude::*, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Initialize logging: stdout plus an optional rolling file appender.
///
/// The level comes from `logging.level` when set, otherwise `RUST_LOG`,
/// otherwise `info`. Keep the returned guard alive for the lifetime of the
/// process; dropping it flushes and stops the file writer.
#[must_use = "dropping the guard stops file logging"]
pub fn init_with_config(cfg: &LoggingConfig) -> Option<WorkerGuard> {
    let env_filter = match &cfg.level {
        Some(level) => EnvFilter::new(level.as_str()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let (file_writer, guard) = if cfg.enable_file_logging {
        build_file_writer(cfg).map_or((None, None), |(writer, guard)| (Some(writer), Some(guard)))
    } else {
        (None, None)
    };

    match cfg.format {
        LogFormat::Json => init_json_logging(env_filter, file_writer),
        LogFormat::Text => init_text_logging(env_filter, file_writer),
    }

    guard
}

fn init_json_logging(env_filter: EnvFilter, file_writer: Option<NonBlocking>) {
    let registry = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stdout),
    );

    if let Some(writer) = file_writer {
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(writer);
        let _ = registry.with(file_layer).try_init();
        return;
    }

    let _ = registry.with(Identity::new()).try_init();
}

fn init_text_logging(env_filter: EnvFilter, file_writer: Option<NonBlocking>) {
    let registry = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stdout),
    );

    if let Some(writer) = file_writer {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(writer);
        let _ = registry.with(file_layer).try_init();
        return;
    }

    let _ = registry.with(Identity::new()).try_init();
}

fn build_file_writer(cfg: &LoggingConfig) -> Option<(NonBlocking, WorkerGuard)> {
    let rotation = match cfg.rotation.to_lowercase().as_str() {
        "hourly" => tracing_appender::rolling::Rotation::HOURLY,
        "never" => tracing_appender::rolling::Rotation::NEVER,
        _ => tracing_appender::rolling::Rotation::DAILY,
    };

    if std::fs::create_dir_all(&cfg.dir).is_err() {
        eprintln!(
            "Failed to create log directory '{}', continuing with stdout logs",
            cfg.dir
        );
        return None;
    }

    let file_appender =
        tracing_appender::rolling::RollingFileAppender::new(rotation, &cfg.dir, &cfg.filename);
    Some(tracing_appender::non_blocking(file_appender))
}
