/// User-adjustable settings, stored under the `settings` key
use crate::host::StorageArea;
use log::warn;
use serde::{Deserialize, Serialize};

pub const SETTINGS_KEY: &str = "settings";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Minimum spacing between tab-creation requests during a restore
    pub restore_delay_ms: u32,
    /// Open restored tabs in the foreground
    pub activate_restored_tabs: bool,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            restore_delay_ms: 100,
            activate_restored_tabs: false,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when absent or unreadable
    pub async fn load(area: &dyn StorageArea) -> Settings {
        let value = match area.get(SETTINGS_KEY).await {
            Ok(Some(value)) => value,
            Ok(None) => return Settings::default(),
            Err(e) => {
                warn!("Could not read settings, using defaults: {}", e);
                return Settings::default();
            }
        };

        serde_json::from_value(value).unwrap_or_else(|e| {
            warn!("Malformed settings, using defaults: {}", e);
            Settings::default()
        })
    }

    pub fn log_level(&self) -> log::Level {
        self.log_level.parse().unwrap_or(log::Level::Info)
    }
}
