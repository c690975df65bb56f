//! Configuration loading and persistence.
//!
//! Handles reading and writing the portal-notify configuration file. The
//! bearer token is never written to disk; it comes from `PORTAL_TOKEN` or is
//! handed to the session at login.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};

use crate::channel::ReconnectPolicy;
use crate::constants;

/// Configuration for the notification engine.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the REST API (the `/Notification/...` routes hang off it).
    pub api_url: String,
    /// URL of the notification hub endpoint.
    pub hub_url: String,
    /// Maximum number of notifications kept in memory.
    pub capacity: usize,
    /// Reconnect schedule in milliseconds; the last entry repeats.
    pub reconnect_delays_ms: Vec<u64>,
    /// Delay before retrying after an authentication close, in milliseconds.
    pub auth_retry_delay_ms: u64,
    /// Bearer token - NOT serialized to disk.
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "https://localhost:7169/api".to_string(),
            hub_url: "https://localhost:7169/notificationHub".to_string(),
            capacity: constants::NOTIFICATION_CAPACITY,
            reconnect_delays_ms: constants::DEFAULT_RECONNECT_DELAYS_MS.to_vec(),
            auth_retry_delay_ms: u64::try_from(constants::AUTH_RETRY_DELAY.as_millis())
                .unwrap_or(5_000),
            token: None,
        }
    }
}

/// Field edits applied by `portal-notify config`. `None` keeps the saved value.
#[derive(Debug, Clone, Default)]
pub struct ConfigEdit {
    /// New REST base URL.
    pub api_url: Option<String>,
    /// New hub endpoint.
    pub hub_url: Option<String>,
    /// New list capacity.
    pub capacity: Option<usize>,
    /// New reconnect schedule in milliseconds.
    pub reconnect_delays_ms: Option<Vec<u64>>,
}

impl ConfigEdit {
    fn apply(self, config: &mut Config) {
        if let Some(api_url) = self.api_url {
            config.api_url = api_url;
        }
        if let Some(hub_url) = self.hub_url {
            config.hub_url = hub_url;
        }
        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
        if let Some(delays) = self.reconnect_delays_ms {
            config.reconnect_delays_ms = delays;
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `PORTAL_CONFIG_DIR` overrides the platform config directory
    /// (macOS: ~/Library/Application Support/portal-notify).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("PORTAL_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("portal-notify")
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_dir(&Self::config_dir()?)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads `config.json` from `dir`, falling back to defaults when absent.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join("config.json");
        if !config_path.exists() {
            log::debug!("No config at {}, using defaults", config_path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", config_path.display()))
    }

    /// Applies `PORTAL_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(api_url) = lookup("PORTAL_API_URL") {
            self.api_url = api_url;
        }

        if let Some(hub_url) = lookup("PORTAL_HUB_URL") {
            self.hub_url = hub_url;
        }

        if let Some(token) = lookup("PORTAL_TOKEN") {
            if !token.trim().is_empty() {
                self.token = Some(token);
            }
        }

        if let Some(capacity) = lookup("PORTAL_CAPACITY") {
            if let Ok(capacity) = capacity.parse::<usize>() {
                self.capacity = capacity;
            }
        }
    }

    /// Persists the configuration to `dir`. The token is not saved.
    pub fn save_to_dir(&self, dir: &Path) -> Result<()> {
        let config_path = dir.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;

        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Applies `edit` to the file saved in `dir` and writes it back.
    ///
    /// Environment overrides are not read, so they never end up on disk.
    /// Returns the path written.
    pub fn edit_in_dir(dir: &Path, edit: ConfigEdit) -> Result<PathBuf> {
        let mut config = Self::load_from_dir(dir)?;
        edit.apply(&mut config);
        config.save_to_dir(dir)?;
        log::info!("Saved config to {}", dir.display());
        Ok(dir.join("config.json"))
    }

    /// Reconnect schedule handed to the hub transport.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.reconnect_delays_ms
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        )
    }

    /// Delay before the authentication retry.
    pub fn auth_retry_delay(&self) -> Duration {
        Duration::from_millis(self.auth_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.capacity, 50);
        assert_eq!(config.reconnect_delays_ms, vec![0, 2_000, 10_000, 30_000]);
        assert_eq!(config.auth_retry_delay(), Duration::from_secs(5));
        assert!(config.token.is_none());
    }

    #[test]
    fn test_config_serialization_excludes_token() {
        let config = Config {
            token: Some("secret_token".to_string()),
            ..Config::default()
        };
        let json = serde_json::to_string(&config).unwrap();

        assert!(!json.contains("secret_token"));
        assert!(!json.contains("\"token\""));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_then_load_keeps_fields() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            hub_url: "https://portal.example/notificationHub".to_string(),
            capacity: 10,
            ..Config::default()
        };
        config.save_to_dir(dir.path()).unwrap();

        let loaded = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(loaded.hub_url, "https://portal.example/notificationHub");
        assert_eq!(loaded.capacity, 10);
    }

    #[test]
    fn test_edit_keeps_unset_fields_and_never_saves_token() {
        let dir = tempfile::tempdir().unwrap();
        Config {
            capacity: 20,
            token: Some("secret_token".to_string()),
            ..Config::default()
        }
        .save_to_dir(dir.path())
        .unwrap();

        let path = Config::edit_in_dir(
            dir.path(),
            ConfigEdit {
                hub_url: Some("https://portal.example/notificationHub".to_string()),
                reconnect_delays_ms: Some(vec![0, 1_000]),
                ..ConfigEdit::default()
            },
        )
        .unwrap();
        assert_eq!(path, dir.path().join("config.json"));

        let loaded = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(loaded.hub_url, "https://portal.example/notificationHub");
        assert_eq!(loaded.reconnect_delays_ms, vec![0, 1_000]);
        assert_eq!(loaded.capacity, 20);
        assert!(!fs::read_to_string(&path).unwrap().contains("secret_token"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{ "api_url": "http://127.0.0.1:5000/api" }"#,
        )
        .unwrap();

        let config = Config::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.api_url, "http://127.0.0.1:5000/api");
        assert_eq!(config.capacity, 50);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORTAL_API_URL", "http://api.test"),
            ("PORTAL_TOKEN", "abc.def.ghi"),
            ("PORTAL_CAPACITY", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.api_url, "http://api.test");
        assert_eq!(config.token.as_deref(), Some("abc.def.ghi"));
        assert_eq!(config.capacity, 50);
    }

    #[test]
    fn test_blank_token_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| (key == "PORTAL_TOKEN").then(|| "  ".to_string()));
        assert!(config.token.is_none());
    }
}
