pub mod advertising_config;
pub mod central_config;

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::advertising_config::AdvertisingConfig;
use crate::config::central_config::CentralConfig;
use crate::core::bluetooth::{COMMAND_QUEUE_CAPACITY, EVENT_QUEUE_CAPACITY, NOTIFICATION_CHANNEL_CAPACITY};
use crate::utils::ensure_parent_exists;

pub const CONFIG_FILE_NAME: &str = "session_config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub central: CentralConfig,
    pub advertising: AdvertisingConfig,

    /// Where the key/value store lives. In memory when unset.
    pub store_path: Option<PathBuf>,

    pub event_queue_capacity: usize,
    pub notification_capacity: usize,
    pub command_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            central: CentralConfig::default(),
            advertising: AdvertisingConfig::default(),
            store_path: None,
            event_queue_capacity: EVENT_QUEUE_CAPACITY,
            notification_capacity: NOTIFICATION_CHANNEL_CAPACITY,
            command_queue_capacity: COMMAND_QUEUE_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Loads the config from `path`, falling back to defaults when the file is missing.
    pub async fn load_config(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path).await? {
            warn!("Config file not found at {:?}, using default.", path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", path);
        Ok(config)
    }

    pub async fn save_config(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        ensure_parent_exists(path).await?;

        let config_json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize session config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(path, config_json).await?;

        info!("Session config saved to {:?}.", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::{UUID_DEFAULT_READ_CHAR, UUID_GENERIC_ACCESS_SERVICE};

    #[test]
    fn defaults_describe_the_virtual_peripheral() {
        let config = SessionConfig::default();
        assert_eq!(config.advertising.service_id, UUID_GENERIC_ACCESS_SERVICE);
        assert_eq!(config.advertising.local_name, "virtual");
        assert_eq!(config.advertising.characteristics.len(), 1);
        let characteristic = &config.advertising.characteristics[0];
        assert_eq!(characteristic.id, UUID_DEFAULT_READ_CHAR);
        assert!(characteristic.properties.readable);
        assert!(characteristic.static_value.is_none());
        assert!(config.central.auto_scan);
        assert_eq!(config.central.step_timeouts().connect.as_secs(), 10);
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig::load_config(dir.path().join(CONFIG_FILE_NAME)).await.unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[tokio::test]
    async fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join(CONFIG_FILE_NAME);
        let mut config = SessionConfig::default();
        config.central.auto_scan = false;
        config.central.subscribe_timeout_secs = 3;
        config.advertising.local_name = "bench".into();
        config.save_config(&path).await.unwrap();

        let loaded = SessionConfig::load_config(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, r#"{ "central": { "auto_scan": false } }"#).await.unwrap();
        let loaded = SessionConfig::load_config(&path).await.unwrap();
        assert!(!loaded.central.auto_scan);
        assert!(loaded.central.open_settings_on_power_off);
        assert_eq!(loaded.advertising, AdvertisingConfig::default());
    }
}
