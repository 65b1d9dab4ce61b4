//! Configuration loader and validator for the account manager.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
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
    pub instaproxy: Instaproxy,
    pub api: Api,
    pub worker: Worker,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Account-data proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instaproxy {
    pub base_url: String,
}

/// JSON API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Api {
    pub listen_addr: String,
}

/// Worker pacing. The three delay knobs of the scheduler are kept as
/// explicit, named parameters so tests can shrink them to zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Worker {
    /// Seconds between scheduler iterations.
    pub tick_seconds: u64,
    /// Seconds between consecutive page fetches within one job run.
    pub attempt_pause_seconds: u64,
    /// Randomized pause (minutes, inclusive) after a job finishes.
    pub cooldown_minutes: [u64; 2],
    /// Randomized reschedule delay (minutes, inclusive) for incomplete syncs.
    pub retry_minutes: [u64; 2],
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
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
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    let base = cfg.instaproxy.base_url.trim();
    if base.is_empty() {
        return Err(ConfigError::Invalid("instaproxy.base_url must be non-empty"));
    }
    if !base.starts_with("http://") && !base.starts_with("https://") {
        return Err(ConfigError::Invalid(
            "instaproxy.base_url must use http or https",
        ));
    }

    if cfg.api.listen_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("api.listen_addr must be non-empty"));
    }

    if cfg.worker.tick_seconds == 0 {
        return Err(ConfigError::Invalid("worker.tick_seconds must be > 0"));
    }
    let [cool_min, cool_max] = cfg.worker.cooldown_minutes;
    if cool_min > cool_max {
        return Err(ConfigError::Invalid(
            "worker.cooldown_minutes must be an ascending [min, max] pair",
        ));
    }
    let [retry_min, retry_max] = cfg.worker.retry_minutes;
    if retry_min > retry_max {
        return Err(ConfigError::Invalid(
            "worker.retry_minutes must be an ascending [min, max] pair",
        ));
    }

    Ok(())
}

/// Returns an example YAML configuration, also used by tests.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

instaproxy:
  base_url: "http://instaproxy:15000"

api:
  listen_addr: "0.0.0.0:10000"

worker:
  tick_seconds: 60
  attempt_pause_seconds: 5
  cooldown_minutes: [10, 15]
  retry_minutes: [20, 30]
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
        assert_eq!(cfg.worker.retry_minutes, [20, 30]);
    }

    #[test]
    fn invalid_base_url() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.instaproxy.base_url = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("base_url")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.instaproxy.base_url = "ftp://example.com".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_worker_ranges() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.worker.tick_seconds = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.worker.retry_minutes = [30, 20];
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.api.listen_addr, "0.0.0.0:10000");
    }
}
