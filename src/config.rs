//! Configuration loader and validator for the Discord→Stoat migration tool.
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
    pub discord: Discord,
    pub stoat: Stoat,
    pub migration: Migration,
}

/// Source platform (Discord) settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Discord {
    pub token: String,
    pub source_server_id: String,
    pub source_channel_id: String,
}

/// Destination platform (Stoat) settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stoat {
    pub api_url: String,
    /// Content-store base URL; when absent it is discovered from the API root.
    #[serde(default)]
    pub cdn_url: Option<String>,
    pub token: String,
    pub target_server_id: String,
    pub target_channel_id: String,
}

/// Run behavior knobs shared by clone and migrate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Migration {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
    #[serde(default = "default_upload_avatars")]
    pub upload_avatars: bool,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_rate_limit_delay_ms() -> u64 {
    1000
}

fn default_upload_avatars() -> bool {
    true
}

impl Migration {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Courtesy pause between message posts, independent of reactive 429 handling.
    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
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
    if cfg.discord.token.trim().is_empty() {
        return Err(ConfigError::Invalid("discord.token must be non-empty"));
    }
    if cfg.discord.source_server_id.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "discord.source_server_id must be non-empty",
        ));
    }
    if cfg.discord.source_channel_id.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "discord.source_channel_id must be non-empty",
        ));
    }

    if cfg.stoat.api_url.trim().is_empty() {
        return Err(ConfigError::Invalid("stoat.api_url must be non-empty"));
    }
    if cfg.stoat.token.trim().is_empty() {
        return Err(ConfigError::Invalid("stoat.token must be non-empty"));
    }
    if cfg.stoat.target_server_id.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "stoat.target_server_id must be non-empty",
        ));
    }
    if cfg.stoat.target_channel_id.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "stoat.target_channel_id must be non-empty",
        ));
    }

    if cfg.migration.retry_attempts == 0 {
        return Err(ConfigError::Invalid(
            "migration.retry_attempts must be > 0",
        ));
    }

    Ok(())
}

/// Returns a complete starter configuration in YAML form.
pub fn example() -> &'static str {
    r#"discord:
  token: "YOUR_DISCORD_BOT_TOKEN"
  source_server_id: "123456789012345678"
  source_channel_id: "123456789012345678"

stoat:
  api_url: "https://api.stoat.chat"
  # cdn_url is optional; discovered from the API root when omitted
  # cdn_url: "https://cdn.stoatusercontent.com"
  token: "YOUR_STOAT_BOT_TOKEN"
  target_server_id: "STOAT_SERVER_ID"
  target_channel_id: "STOAT_CHANNEL_ID"

migration:
  dry_run: false
  retry_attempts: 3
  retry_delay_ms: 2000
  rate_limit_delay_ms: 1000
  upload_avatars: true
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
        assert_eq!(cfg.migration.retry_attempts, 3);
        assert!(!cfg.migration.dry_run);
    }

    #[test]
    fn migration_defaults_fill_in() {
        let yaml = r#"discord:
  token: "t"
  source_server_id: "1"
  source_channel_id: "2"
stoat:
  api_url: "https://api.stoat.chat"
  token: "t"
  target_server_id: "s"
  target_channel_id: "c"
migration: {}
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.migration.retry_attempts, 3);
        assert_eq!(cfg.migration.retry_delay_ms, 2000);
        assert_eq!(cfg.migration.rate_limit_delay_ms, 1000);
        assert!(cfg.migration.upload_avatars);
        assert!(cfg.stoat.cdn_url.is_none());
    }

    #[test]
    fn invalid_discord_token() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.discord.token = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("discord.token")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_stoat_ids() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.stoat.target_server_id = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("target_server_id")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.stoat.target_channel_id = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("target_channel_id")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn zero_retry_attempts_rejected() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.migration.retry_attempts = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.stoat.api_url, "https://api.stoat.chat");
    }
}
