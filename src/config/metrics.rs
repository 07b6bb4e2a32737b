//! Host metrics + StatsD configuration (`metrics.*` in the YAML file).

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::duration::parse_duration;

#[derive(Debug, Clone)]
pub struct StatsdConfig {
    pub enabled: bool,
    pub listen_addr: String,
    pub namespace: Option<String>,
    pub tags: HashMap<String, String>,
    /// Deliberate choice: absolute values by default.
    pub gauge_deltas: bool,
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: ":8125".to_string(),
            namespace: None,
            tags: HashMap::new(),
            gauge_deltas: false,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileStatsdConfig {
    pub enabled: Option<bool>,
    pub listen_addr: Option<String>,
    pub namespace: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub gauge_deltas: Option<bool>,
}

impl StatsdConfig {
    fn from_file(file: FileStatsdConfig) -> Self {
        let defaults = Self::default();
        Self {
            enabled: file.enabled.unwrap_or(defaults.enabled),
            listen_addr: file.listen_addr.unwrap_or(defaults.listen_addr),
            namespace: file.namespace,
            tags: file.tags,
            gauge_deltas: file.gauge_deltas.unwrap_or(defaults.gauge_deltas),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub tags: HashMap<String, String>,
    pub statsd: StatsdConfig,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(30),
            tags: HashMap::new(),
            statsd: StatsdConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileMetricsConfig {
    pub enabled: Option<bool>,
    pub interval: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub statsd: Option<FileStatsdConfig>,
}

impl MetricsConfig {
    pub fn from_file(file: Option<FileMetricsConfig>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();
        Self {
            enabled: file.enabled.unwrap_or(defaults.enabled),
            interval: file
                .interval
                .as_deref()
                .and_then(parse_duration)
                .unwrap_or(defaults.interval),
            tags: file.tags,
            statsd: StatsdConfig::from_file(file.statsd.unwrap_or_default()),
        }
    }
}
