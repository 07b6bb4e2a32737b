//! Forwarder/disk-queue delivery tuning (`delivery.*` in the YAML file).

use serde::Deserialize;
use std::time::Duration;

use super::duration::parse_duration;

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub batch_size: usize,
    pub compress: bool,
    /// `0` disables the size bound.
    pub max_batch_bytes: usize,
    pub queue_retention: Duration,
    pub dead_letter_retention: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            compress: false,
            max_batch_bytes: 0,
            queue_retention: Duration::from_secs(24 * 3600),
            dead_letter_retention: Duration::from_secs(168 * 3600),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileDeliveryConfig {
    pub batch_size: Option<usize>,
    pub compress: Option<bool>,
    pub max_batch_bytes: Option<usize>,
    pub queue_retention: Option<String>,
    pub dead_letter_retention: Option<String>,
}

impl DeliveryConfig {
    pub fn from_file(file: Option<FileDeliveryConfig>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();
        Self {
            batch_size: file.batch_size.unwrap_or(defaults.batch_size),
            compress: file.compress.unwrap_or(defaults.compress),
            max_batch_bytes: file.max_batch_bytes.unwrap_or(defaults.max_batch_bytes),
            queue_retention: file
                .queue_retention
                .as_deref()
                .and_then(parse_duration)
                .unwrap_or(defaults.queue_retention),
            dead_letter_retention: file
                .dead_letter_retention
                .as_deref()
                .and_then(parse_duration)
                .unwrap_or(defaults.dead_letter_retention),
        }
    }
}
