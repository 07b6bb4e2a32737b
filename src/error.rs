//! Component-level error enums.
//!
//! Each pipeline component has a closed set of failure modes with a distinct
//! recovery policy. `anyhow` is reserved for `main.rs` startup plumbing only;
//! every component boundary below returns one of these.

use thiserror::Error;

/// Errors raised while loading or validating the YAML configuration.
/// Always fatal: the agent does not start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by producers (tailers, sampler, statsd, proxy capturer).
/// Transient variants are logged and the event is dropped; the producer continues.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line parse error: {0}")]
    Parse(String),
    #[error("producer not supported on this platform")]
    NotSupported,
}

/// Errors raised by [`crate::forwarder::Forwarder::send`].
#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("event invalid: {0}")]
    InvalidEvent(String),
    #[error("authentication failed")]
    AuthFailed,
    #[error("retryable error after {attempts} attempts: {message}")]
    Retryable { attempts: u32, message: String },
    #[error("non-retryable error (status {status}): {body}")]
    NonRetryable { status: u16, body: String },
    #[error("request build/transport error: {0}")]
    Transport(String),
}

impl ForwarderError {
    /// Whether this failure is worth a DiskQueue spill rather than a drop.
    pub fn should_spill(&self) -> bool {
        !matches!(self, ForwarderError::InvalidEvent(_))
    }
}

/// Errors raised by [`crate::diskqueue::DiskQueue`].
#[derive(Debug, Error)]
pub enum DiskQueueError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no token found for {0}")]
    UnknownToken(String),
}

/// Errors raised by [`crate::analytics::AnalyticsWriter`].
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("database error: {0}")]
    Database(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("write queue full, batch dropped")]
    QueueFull,
}
