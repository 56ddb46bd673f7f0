//! Tracing setup: console output plus an optional daily-rolling log file.
//!
//! The file writer runs on its own thread behind a bounded, lossy buffer,
//! so a slow disk drops log lines instead of stalling the browser loop.

use crate::core::config::LoggingConfig;
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Console filter: `RUST_LOG` wins over the configured directive.
fn console_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let console_layer = fmt::layer()
        .with_target(true)
        .with_filter(console_filter(config));

    let mut guard = None;
    let file_layer = match &config.directory {
        Some(dir) => match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = RollingFileAppender::new(Rotation::DAILY, dir, &config.file_prefix);
                let (writer, worker) = NonBlockingBuilder::default()
                    .lossy(true)
                    .buffered_lines_limit(config.buffered_lines_limit)
                    .finish(appender);
                guard = Some(worker);
                Some(
                    fmt::layer()
                        .with_target(true)
                        .with_ansi(false)
                        .with_writer(writer)
                        .with_filter(EnvFilter::new(&config.filter)),
                )
            }
            Err(e) => {
                eprintln!("Warning: failed to create log directory {:?}: {}", dir, e);
                None
            }
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(dir) = &config.directory {
        if guard.is_some() {
            tracing::info!("File logging enabled: {:?}", dir);
        }
    }
    guard
}
