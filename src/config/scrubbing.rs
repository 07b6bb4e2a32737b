//! Scrubber ruleset configuration (`scrubbing.*` in the YAML file).

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ScrubRuleConfig {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub drop: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScrubbingConfig {
    pub enabled: bool,
    pub rules: Vec<ScrubRuleConfig>,
}

#[derive(Debug, Deserialize, Default)]
pub struct FileScrubbingConfig {
    pub enabled: Option<bool>,
    #[serde(default)]
    pub rules: Vec<ScrubRuleConfig>,
}

impl ScrubbingConfig {
    pub fn from_file(file: Option<FileScrubbingConfig>) -> Self {
        let file = file.unwrap_or_default();
        Self {
            enabled: file.enabled.unwrap_or(false),
            rules: file.rules,
        }
    }
}
