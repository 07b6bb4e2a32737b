//! Tracing subscriber setup, grounded in the same `main.rs`
//! subscriber init -- same `EnvFilter`-plus-`fmt::layer()` registry, minus
//! a TUI capture layer this binary doesn't need.
//!
//! Precedence: `RUST_LOG` env var > configured level > hardcoded `"info"`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::logging::{LogRotation, LoggingConfig};

/// Must be kept alive for the life of the process: dropping it stops the
/// non-blocking file writer from flushing (mirrors `tracing_appender`'s own
/// documented contract).
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

pub fn init(config: &LoggingConfig) -> LoggingGuard {
    let default_filter = format!("sidecar_agent={level},tower_http=info", level = config.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    if config.file_enabled {
        let rotation = match config.file_rotation {
            LogRotation::Hourly => tracing_appender::rolling::Rotation::HOURLY,
            LogRotation::Daily => tracing_appender::rolling::Rotation::DAILY,
            LogRotation::Never => tracing_appender::rolling::Rotation::NEVER,
        };
        let appender = tracing_appender::rolling::RollingFileAppender::new(
            rotation,
            &config.file_dir,
            &config.file_prefix,
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
            .init();

        LoggingGuard {
            _file_guard: Some(guard),
        }
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();

        LoggingGuard { _file_guard: None }
    }
}
