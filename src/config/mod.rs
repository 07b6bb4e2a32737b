//! Agent configuration.
//!
//! Loaded from a single YAML file, the way a `Config` type loads a
//! single TOML file: a `FileConfig` deserialization shape with `Option`
//! fields, merged against hardcoded defaults by a `from_file`/`from_path`
//! function per sub-area. Flag parsing and interactive setup are out of
//! scope for this module -- it only reads one path, from the
//! `SIDECAR_AGENT_CONFIG` env var or the default location.

mod analytics;
mod delivery;
mod duration;
mod logging;
mod logs;
mod metrics;
mod proxy;
mod scrubbing;

pub use analytics::AnalyticsConfig;
pub use delivery::DeliveryConfig;
pub use logging::LoggingConfig;
pub use logs::LogSourceConfig;
pub use metrics::{MetricsConfig, StatsdConfig};
pub use proxy::ProxyConfig;
pub use scrubbing::{ScrubRuleConfig, ScrubbingConfig};

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Top-level agent configuration, assembled from [`FileConfig`] plus
/// per-area defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub organization_id: String,
    pub api_key: Option<String>,
    pub api_endpoint: Option<String>,
    pub service_name: String,
    pub environment: String,
    pub tags: HashMap<String, String>,
    pub buffer_size: usize,
    pub flush_interval: std::time::Duration,
    pub delivery: DeliveryConfig,
    pub metrics: MetricsConfig,
    pub analytics: AnalyticsConfig,
    pub proxy: ProxyConfig,
    pub logs: Vec<LogSourceConfig>,
    pub scrubbing: ScrubbingConfig,
    pub logging: LoggingConfig,
    /// Not part of the delivery/metrics/proxy tables, but needed to stand
    /// the health endpoint's optional HTTP server up at all.
    pub health_port: Option<u16>,
    pub queue_dir: PathBuf,
}

impl Config {
    /// Agent runs local-only when no `api_key` is configured.
    pub fn remote_enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Raw YAML shape, mirroring [`Config`] field-for-field but with every leaf
/// optional so partial config files (and an absent file entirely) both work.
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    organization_id: Option<String>,
    api_key: Option<String>,
    api_endpoint: Option<String>,
    service_name: Option<String>,
    environment: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
    buffer_size: Option<usize>,
    flush_interval: Option<String>,
    delivery: Option<delivery::FileDeliveryConfig>,
    metrics: Option<metrics::FileMetricsConfig>,
    analytics: Option<analytics::FileAnalyticsConfig>,
    proxy: Option<proxy::FileProxyConfig>,
    #[serde(default)]
    logs: Vec<LogSourceConfig>,
    scrubbing: Option<scrubbing::FileScrubbingConfig>,
    logging: Option<logging::FileLoggingConfig>,
    health_port: Option<u16>,
    queue_dir: Option<String>,
}

const DEFAULT_ENVIRONMENT: &str = "production";
const DEFAULT_BUFFER_SIZE: usize = 1000;
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 10;

/// Env var naming the config file path, mirroring the same
/// `ASPY_*`-prefixed overrides but collapsed to the one the core needs.
pub const CONFIG_PATH_ENV: &str = "SIDECAR_AGENT_CONFIG";

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("sidecar-agent").join("config.yaml"))
    }

    fn resolve_path() -> Option<PathBuf> {
        std::env::var(CONFIG_PATH_ENV)
            .ok()
            .map(PathBuf::from)
            .or_else(Self::default_path)
    }

    /// Load from `SIDECAR_AGENT_CONFIG` (or the default path); a missing
    /// file is not an error, but a present-and-unparseable file is fatal --
    /// the agent does not start on an invalid configuration.
    pub fn load() -> Result<Self, ConfigError> {
        let Some(path) = Self::resolve_path() else {
            return Self::from_file(FileConfig::default());
        };
        Self::load_path(&path)
    }

    pub fn load_path(path: &Path) -> Result<Self, ConfigError> {
        let file = match std::fs::read_to_string(path) {
            Ok(contents) => serde_yaml::from_str::<FileConfig>(&contents).map_err(|source| {
                ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                }
            })?,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Self::from_file(file)
    }

    fn from_file(file: FileConfig) -> Result<Self, ConfigError> {
        let service_name = file
            .service_name
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::Invalid("service_name is required".to_string()))?;

        let flush_interval = file
            .flush_interval
            .as_deref()
            .and_then(duration::parse_duration)
            .unwrap_or_else(|| std::time::Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS));

        let queue_dir = file
            .queue_dir
            .map(PathBuf::from)
            .unwrap_or_else(default_queue_dir);

        Ok(Self {
            organization_id: file.organization_id.unwrap_or_else(|| "local".to_string()),
            api_key: file.api_key.filter(|k| !k.is_empty()),
            api_endpoint: file.api_endpoint,
            service_name,
            environment: file
                .environment
                .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
            tags: file.tags,
            buffer_size: file.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE),
            flush_interval,
            delivery: DeliveryConfig::from_file(file.delivery),
            metrics: MetricsConfig::from_file(file.metrics),
            analytics: AnalyticsConfig::from_file(file.analytics),
            proxy: ProxyConfig::from_file(file.proxy),
            logs: file.logs,
            scrubbing: ScrubbingConfig::from_file(file.scrubbing),
            logging: LoggingConfig::from_file(file.logging),
            health_port: file.health_port,
            queue_dir,
        })
    }
}

fn default_queue_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".yaat")
        .join("queue")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_service_name_is_invalid() {
        let err = Config::from_file(FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn defaults_match_documented_values() {
        let file = FileConfig {
            service_name: Some("svc".to_string()),
            ..Default::default()
        };
        let config = Config::from_file(file).unwrap();
        assert_eq!(config.organization_id, "local");
        assert_eq!(config.environment, "production");
        assert_eq!(config.buffer_size, 1000);
        assert_eq!(config.flush_interval, std::time::Duration::from_secs(10));
        assert_eq!(config.delivery.batch_size, 500);
        assert!(!config.remote_enabled());
    }

    #[test]
    fn api_key_enables_remote_delivery() {
        let file = FileConfig {
            service_name: Some("svc".to_string()),
            api_key: Some("secret".to_string()),
            ..Default::default()
        };
        let config = Config::from_file(file).unwrap();
        assert!(config.remote_enabled());
    }

    #[test]
    fn parses_full_yaml_document() {
        let yaml = r#"
service_name: checkout
environment: staging
api_key: secret123
api_endpoint: https://ingest.example.com/v1/events
buffer_size: 2000
flush_interval: 5s
delivery:
  batch_size: 250
  compress: true
  queue_retention: 48h
metrics:
  enabled: true
  interval: 15s
  statsd:
    enabled: true
    listen_addr: "0.0.0.0:8125"
analytics:
  enabled: true
  retention_days: 7
logs:
  - path: /var/log/app.log
    format: django
scrubbing:
  enabled: true
  rules:
    - name: redact-emails
      pattern: "[\\w.]+@[\\w.]+"
      replacement: "[EMAIL]"
      drop: false
"#;
        let file: FileConfig = serde_yaml::from_str(yaml).unwrap();
        let config = Config::from_file(file).unwrap();
        assert_eq!(config.service_name, "checkout");
        assert_eq!(config.environment, "staging");
        assert!(config.remote_enabled());
        assert_eq!(config.delivery.batch_size, 250);
        assert!(config.delivery.compress);
        assert_eq!(config.delivery.queue_retention, std::time::Duration::from_secs(48 * 3600));
        assert!(config.metrics.enabled);
        assert!(config.metrics.statsd.enabled);
        assert_eq!(config.logs.len(), 1);
        assert!(config.scrubbing.enabled);
        assert_eq!(config.scrubbing.rules.len(), 1);
    }
}
