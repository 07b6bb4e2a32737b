//! HTTP reverse-proxy capturer configuration (`proxy.*` in the YAML file).

use serde::Deserialize;

#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub listen_port: u16,
    pub upstream_url: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct FileProxyConfig {
    pub enabled: Option<bool>,
    pub listen_port: Option<u16>,
    pub upstream_url: Option<String>,
}

impl ProxyConfig {
    pub fn from_file(file: Option<FileProxyConfig>) -> Self {
        let file = file.unwrap_or_default();
        Self {
            enabled: file.enabled.unwrap_or(false),
            listen_port: file.listen_port.unwrap_or(0),
            upstream_url: file.upstream_url.unwrap_or_default(),
        }
    }
}
