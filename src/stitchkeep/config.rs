use crate::backup::{DEFAULT_AUTO_INTERVAL_HOURS, DEFAULT_MAX_BACKUPS};
use crate::cache::DEFAULT_TTL_SECS;
use crate::error::{Result, VaultError};
use crate::gateway::GatewayOptions;
use crate::search::DEFAULT_DEBOUNCE_MS;
use crate::sync::{
    SyncTimings, DEFAULT_HEARTBEAT_SECS, DEFAULT_SIGNAL_WINDOW_MS, DEFAULT_STORAGE_DEBOUNCE_MS,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const CONFIG_FILENAME: &str = "config.json";
const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Configuration for stitchkeep, stored in `<data dir>/config.json`.
///
/// Every field has a default, so a partial (or missing) file is fine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VaultConfig {
    /// Base URL of the Collection API
    pub api_url: String,
    /// Shared secret sent with every request, if the server wants one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    pub remote_timeout_ms: u64,
    pub cache_ttl_secs: i64,
    pub page_size: usize,
    pub search_debounce_ms: u64,
    pub max_backups: usize,
    pub auto_backup: bool,
    pub auto_backup_interval_hours: i64,
    pub heartbeat_secs: i64,
    pub signal_window_ms: i64,
    pub storage_debounce_ms: i64,
    /// Image payloads longer than this are dropped when the local store is full
    pub image_strip_threshold: usize,
    /// Byte limit for the file store; unlimited when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_quota_bytes: Option<usize>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_secret: None,
            remote_timeout_ms: 5_000,
            cache_ttl_secs: DEFAULT_TTL_SECS,
            page_size: 20,
            search_debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_backups: DEFAULT_MAX_BACKUPS,
            auto_backup: true,
            auto_backup_interval_hours: DEFAULT_AUTO_INTERVAL_HOURS,
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            signal_window_ms: DEFAULT_SIGNAL_WINDOW_MS,
            storage_debounce_ms: DEFAULT_STORAGE_DEBOUNCE_MS,
            image_strip_threshold: 500_000,
            local_quota_bytes: None,
        }
    }
}

impl VaultConfig {
    /// Load config from the given directory, or return defaults if not found
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILENAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)?;
        let config: VaultConfig = serde_json::from_str(&content).map_err(|e| {
            VaultError::Config(format!("{}: {}", config_path.display(), e))
        })?;
        config.check()?;
        Ok(config)
    }

    /// Save config to the given directory
    pub fn save<P: AsRef<Path>>(&self, config_dir: P) -> Result<()> {
        let config_dir = config_dir.as_ref();
        fs::create_dir_all(config_dir)?;

        let content = serde_json::to_string_pretty(self)?;
        fs::write(config_dir.join(CONFIG_FILENAME), content)?;
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(VaultError::Config("page_size must be at least 1".into()));
        }
        if self.auto_backup_interval_hours <= 0 {
            return Err(VaultError::Config(
                "auto_backup_interval_hours must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_ttl_secs)
    }

    pub fn auto_backup_interval(&self) -> chrono::Duration {
        chrono::Duration::hours(self.auto_backup_interval_hours)
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            remote_timeout: self.remote_timeout(),
            image_strip_threshold: self.image_strip_threshold,
        }
    }

    pub fn sync_timings(&self) -> SyncTimings {
        SyncTimings {
            debounce: chrono::Duration::milliseconds(self.storage_debounce_ms),
            heartbeat: chrono::Duration::seconds(self.heartbeat_secs),
            window: chrono::Duration::milliseconds(self.signal_window_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = VaultConfig::load(dir.path()).unwrap();
        assert_eq!(config, VaultConfig::default());
        assert_eq!(config.cache_ttl_secs, 300);
        assert_eq!(config.max_backups, 30);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILENAME),
            r#"{"api_url": "http://nas.local:3000", "page_size": 50}"#,
        )
        .unwrap();

        let config = VaultConfig::load(dir.path()).unwrap();
        assert_eq!(config.api_url, "http://nas.local:3000");
        assert_eq!(config.page_size, 50);
        assert_eq!(config.search_debounce_ms, 300);
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let config = VaultConfig {
            auto_backup: false,
            api_secret: Some("s3cret".into()),
            ..Default::default()
        };
        config.save(dir.path().join("nested")).unwrap();
        assert_eq!(VaultConfig::load(dir.path().join("nested")).unwrap(), config);
    }

    #[test]
    fn rejects_zero_page_size() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILENAME), r#"{"page_size": 0}"#).unwrap();
        assert!(matches!(
            VaultConfig::load(dir.path()),
            Err(VaultError::Config(_))
        ));
    }
}
