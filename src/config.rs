//! Configuration loader and validator for the listing batch engine.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub processing: Processing,
    pub publisher: PublisherSettings,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Processing pass tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Processing {
    /// Publish calls allowed in flight per pass.
    pub concurrency: usize,
    pub publish_timeout_ms: u64,
}

/// Listings gateway settings used by the HTTP publisher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublisherSettings {
    pub base_url: String,
    pub token: String,
}

impl App {
    /// `data_dir` with a leading `~/` expanded.
    pub fn resolved_data_dir(&self) -> String {
        match (self.data_dir.strip_prefix("~/"), std::env::var("HOME")) {
            (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
            _ => self.data_dir.clone(),
        }
    }
}

impl Processing {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// Default SQLite location inside the data directory.
    pub fn database_url(&self) -> String {
        format!("sqlite://{}/listings.db", self.app.resolved_data_dir())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.processing.concurrency == 0 {
        return Err(ConfigError::Invalid("processing.concurrency must be > 0"));
    }
    if cfg.processing.publish_timeout_ms == 0 {
        return Err(ConfigError::Invalid("processing.publish_timeout_ms must be > 0"));
    }
    if cfg.publisher.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("publisher.base_url must be non-empty"));
    }
    if !cfg.publisher.base_url.ends_with('/') {
        // Url::join would drop the last path segment otherwise.
        return Err(ConfigError::Invalid("publisher.base_url must end with '/'"));
    }
    if cfg.publisher.token.trim().is_empty() {
        return Err(ConfigError::Invalid("publisher.token must be non-empty"));
    }
    Ok(())
}

/// Canonical example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

processing:
  concurrency: 4
  publish_timeout_ms: 30000

publisher:
  base_url: "https://listings.example.com/"
  token: "YOUR_LISTINGS_GATEWAY_TOKEN"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.processing.publish_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn invalid_processing() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.processing.concurrency = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("concurrency")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.processing.publish_timeout_ms = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("publish_timeout_ms")), _ => panic!("wrong error") }
    }

    #[test]
    fn invalid_publisher() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.publisher.token = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.publisher.base_url = "https://listings.example.com/api".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("end with")), _ => panic!("wrong error") }
    }

    #[test]
    fn missing_section_is_parse_error() {
        let yaml = "app:\n  data_dir: ./data\n";
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, yaml).unwrap();
        assert!(matches!(load(Some(&p)), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
        assert!(cfg.database_url().ends_with("data/listings.db"));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.processing.concurrency, 4);
    }
}
