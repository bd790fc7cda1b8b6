use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::endpoint::DEFAULT_PLATFORM_URI;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlatformConfig {
    #[serde(default = "default_platform_uri")]
    pub default_uri: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            default_uri: default_platform_uri(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_platform_uri() -> String {
    DEFAULT_PLATFORM_URI.to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_search_hub")]
    pub search_hub: String,
    /// URL of an HTTP endpoint issuer. Takes precedence over `token`.
    #[serde(default)]
    pub issuer_url: Option<String>,
    /// Static search token; `COVEO_TOKEN` overrides it.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            search_hub: default_search_hub(),
            issuer_url: None,
            token: None,
            store_dir: default_store_dir(),
        }
    }
}

fn default_search_hub() -> String {
    "Chatbot".to_string()
}
fn default_store_dir() -> PathBuf {
    PathBuf::from("./.cbot")
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    #[serde(default = "default_action_cause")]
    pub action_cause: String,
    #[serde(default = "default_origin_level2")]
    pub origin_level2: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_action_cause")]
    pub user_agent: String,
    #[serde(default)]
    pub anonymous: bool,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            action_cause: default_action_cause(),
            origin_level2: default_origin_level2(),
            language: default_language(),
            user_agent: default_action_cause(),
            anonymous: false,
        }
    }
}

fn default_action_cause() -> String {
    "Chatbot".to_string()
}
fn default_origin_level2() -> String {
    "Chatbot question".to_string()
}
fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
        }
    }
}

fn default_max_results() -> usize {
    3
}

/// Extra fields merged into every Search API request body.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct QueryConfig {
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl Config {
    /// All defaults; used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// The static token, preferring `COVEO_TOKEN` from the environment.
    pub fn static_token(&self) -> Option<String> {
        std::env::var("COVEO_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.session.token.clone())
    }

    /// Long-lived store file (visitor id).
    pub fn local_store_path(&self) -> PathBuf {
        self.session.store_dir.join("local.json")
    }

    /// Session-scoped store file (cached endpoint descriptor).
    pub fn session_store_path(&self) -> PathBuf {
        self.session.store_dir.join("session.json")
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields [`Config::minimal`].
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::minimal());
    }
    load_config(path)
}

fn validate(config: &Config) -> Result<()> {
    if config.display.max_results == 0 {
        anyhow::bail!("display.max_results must be >= 1");
    }

    if config.session.search_hub.trim().is_empty() {
        anyhow::bail!("session.search_hub must not be empty");
    }

    if !config.platform.default_uri.starts_with("http://")
        && !config.platform.default_uri.starts_with("https://")
    {
        anyhow::bail!(
            "platform.default_uri must be an http(s) URL, got '{}'",
            config.platform.default_uri
        );
    }

    if config.platform.timeout_secs == 0 {
        anyhow::bail!("platform.timeout_secs must be > 0");
    }

    if config.query.extra.contains_key("q") {
        anyhow::bail!("query.extra must not set 'q'; the query text comes from the caller");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(content: &str) -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cbot.toml");
        std::fs::write(&path, content).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let (_tmp, path) = write_config("");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.session.search_hub, "Chatbot");
        assert_eq!(cfg.platform.default_uri, "https://platform.cloud.coveo.com");
        assert_eq!(cfg.display.max_results, 3);
        assert_eq!(cfg.analytics.origin_level2, "Chatbot question");
        assert_eq!(cfg.analytics.user_agent, "Chatbot");
    }

    #[test]
    fn test_full_config() {
        let (_tmp, path) = write_config(
            r#"
[platform]
default_uri = "https://org.org.coveo.com"
timeout_secs = 5

[session]
search_hub = "Support"
issuer_url = "https://sf.example/endpoint"
store_dir = "/tmp/cbot"

[analytics]
language = "fr"
anonymous = true

[display]
max_results = 5

[query.extra]
pipeline = "chatbot"
numberOfResults = 10
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.session.search_hub, "Support");
        assert_eq!(cfg.platform.timeout_secs, 5);
        assert!(cfg.analytics.anonymous);
        assert_eq!(cfg.display.max_results, 5);
        assert_eq!(cfg.query.extra["pipeline"], "chatbot");
        assert_eq!(cfg.query.extra["numberOfResults"], 10);
        assert_eq!(cfg.session_store_path(), PathBuf::from("/tmp/cbot/session.json"));
    }

    #[test]
    fn test_rejects_zero_max_results() {
        let (_tmp, path) = write_config("[display]\nmax_results = 0\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_rejects_q_in_extra() {
        let (_tmp, path) = write_config("[query.extra]\nq = \"hijack\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_missing_file_falls_back() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_or_default(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.display.max_results, 3);
    }
}
