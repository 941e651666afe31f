//! Structured logging initialization (console + optional rolling file).

use tracing_subscriber::{fmt::time::UtcTime, layer::Identity, prelude::*};

use crate::config::{LogFormat, LoggingConfig};

/// Initialize the global `tracing` subscriber from a [`LoggingConfig`].
///
/// The configured level is used as the `EnvFilter` directive; `RUST_LOG`,
/// if set, is layered on top by `tracing_subscriber`'s usual precedence.
pub fn init_with_config(cfg: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.level.as_filter_str()));

    match cfg.format {
        LogFormat::Json => init_json_logging(cfg, env_filter),
        LogFormat::Text => init_text_logging(cfg, env_filter),
    }
}

fn init_json_logging(cfg: &LoggingConfig, env_filter: tracing_subscriber::EnvFilter) {
    let registry = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stdout),
    );

    if let Some(dir) = &cfg.dir {
        if let Some(file_layer) = build_file_layer(dir, &cfg.filename, |writer| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer)
        }) {
            let _ = registry.with(file_layer).try_init();
            return;
        }
    }

    let _ = registry.with(Identity::new()).try_init();
}

fn init_text_logging(cfg: &LoggingConfig, env_filter: tracing_subscriber::EnvFilter) {
    let registry = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stdout),
    );

    if let Some(dir) = &cfg.dir {
        if let Some(file_layer) = build_file_layer(dir, &cfg.filename, |writer| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer)
        }) {
            let _ = registry.with(file_layer).try_init();
            return;
        }
    }

    let _ = registry.with(Identity::new()).try_init();
}

fn build_file_layer<F, L>(dir: &str, filename: &str, build_layer: F) -> Option<L>
where
    F: FnOnce(tracing_appender::non_blocking::NonBlocking) -> L,
{
    if std::fs::create_dir_all(dir).is_err() {
        eprintln!("Failed to create log directory '{dir}', continuing with stdout logs");
        return None;
    }

    let file_appender =
        tracing_appender::rolling::RollingFileAppender::new(
            tracing_appender::rolling::Rotation::DAILY,
            dir,
            filename,
        );
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    // Leaked deliberately: the guard must outlive the subscriber, which
    // lives for the remainder of the process.
    let _leaked: &'static _ = Box::leak(Box::new(file_guard));

    Some(build_layer(non_blocking))
}
