// SPDX-License-Identifier: GPL-3.0-only

use crate::constants::{DEFAULT_CONTAINER_WIDTH, ScannerProfile, ScannerVariant};
use crate::errors::{ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Language of user-facing messages
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Locale {
    #[default]
    English,
    Arabic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scanner front end used by `scan`
    pub variant: ScannerVariant,
    /// Keep scanning after the first accepted barcode
    pub multi_scan: bool,
    /// Width of the preview container, sizes the library scan region
    pub container_width: u32,
    /// Language of error messages
    pub locale: Locale,
    /// Play the confirmation tone on acceptance
    pub sound_enabled: bool,
    /// Pulse the vibration motor on acceptance
    pub haptics_enabled: bool,
    /// Override for the pending-scan store file
    pub storage_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            variant: ScannerVariant::default(),
            multi_scan: false,
            container_width: DEFAULT_CONTAINER_WIDTH,
            locale: Locale::default(),
            sound_enabled: true,
            haptics_enabled: true,
            storage_path: None,
        }
    }
}

impl Config {
    pub const APP_DIR: &'static str = "hyperpos-scanner";

    /// `~/.config/hyperpos-scanner/config.json` on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(Self::APP_DIR).join("config.json"))
    }

    /// Load from the default location, falling back to defaults on any problem
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            warn!("No config directory on this platform, using defaults");
            return Self::default();
        };
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Using default configuration");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> ScanResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ScanError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| ScanError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save_to(&self, path: &Path) -> ScanResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ScanError::Config(e.to_string()))?;
        }
        let text =
            serde_json::to_string_pretty(self).map_err(|e| ScanError::Config(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| ScanError::Config(e.to_string()))
    }

    /// Profile of the configured variant with the user's multi-scan choice applied
    pub fn profile(&self) -> ScannerProfile {
        self.variant.profile().with_multi_scan(self.multi_scan)
    }

    /// Pending-scan store location
    pub fn storage_path(&self) -> Option<PathBuf> {
        self.storage_path.clone().or_else(|| {
            dirs::data_dir().map(|dir| dir.join(Self::APP_DIR).join("pending.json"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{ "multi_scan": true }"#).unwrap();
        assert!(config.multi_scan);
        assert_eq!(config.container_width, DEFAULT_CONTAINER_WIDTH);
        assert!(config.sound_enabled);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("hyperpos-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");
        let config = Config {
            variant: ScannerVariant::Web,
            locale: Locale::Arabic,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::load_from(Path::new("/nonexistent/hyperpos.json")).unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }
}
