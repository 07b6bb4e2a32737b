//! Local analytics writer configuration (`analytics.*` in the YAML file).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use super::duration::parse_duration;

#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub database_path: PathBuf,
    pub retention_days: i64,
    pub max_size_gb: f64,
    pub batch_size: usize,
    pub write_timeout: Duration,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            database_path: default_database_path(),
            retention_days: 14,
            max_size_gb: 2.0,
            batch_size: 500,
            write_timeout: Duration::from_secs(5),
        }
    }
}

fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".yaat")
        .join("analytics.db")
}

#[derive(Debug, Deserialize, Default)]
pub struct FileAnalyticsConfig {
    pub enabled: Option<bool>,
    pub database_path: Option<String>,
    pub retention_days: Option<i64>,
    pub max_size_gb: Option<f64>,
    pub batch_size: Option<usize>,
    pub write_timeout: Option<String>,
}

impl AnalyticsConfig {
    pub fn from_file(file: Option<FileAnalyticsConfig>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();
        Self {
            enabled: file.enabled.unwrap_or(defaults.enabled),
            database_path: file
                .database_path
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            retention_days: file.retention_days.unwrap_or(defaults.retention_days),
            max_size_gb: file.max_size_gb.unwrap_or(defaults.max_size_gb),
            batch_size: file.batch_size.unwrap_or(defaults.batch_size),
            write_timeout: file
                .write_timeout
                .as_deref()
                .and_then(parse_duration)
                .unwrap_or(defaults.write_timeout),
        }
    }
}
