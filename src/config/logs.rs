//! `logs[]` tailer configuration.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct LogSourceConfig {
    pub path: String,
    pub format: String,
}
