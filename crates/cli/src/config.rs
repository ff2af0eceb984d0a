//! CLI configuration
//!
//! # Example Configuration
//! ```toml
//! log_level = "info"
//!
//! [bridge]
//! imu_frequency = "120hz"
//! strict_3d = false
//! permission_wait_secs = 30
//!
//! [usb]
//! usbfs_root = "/dev/bus/usb"
//! ```

use anyhow::{Context, Result, anyhow};
use bridge::BridgeConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// System-wide fallback location
const SYSTEM_CONFIG_PATH: &str = "/etc/xr-bridge/config.toml";

/// Configuration file contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default = "CliConfig::default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub usb: UsbSettings,
}

/// Where the libusb host looks for device nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsbSettings {
    /// usbfs mount point; `~` is expanded
    #[serde(default = "UsbSettings::default_usbfs_root")]
    pub usbfs_root: String,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            usbfs_root: Self::default_usbfs_root(),
        }
    }
}

impl UsbSettings {
    fn default_usbfs_root() -> String {
        "/dev/bus/usb".to_string()
    }

    pub fn usbfs_root(&self) -> PathBuf {
        expand(&self.usbfs_root)
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            bridge: BridgeConfig::default(),
            usb: UsbSettings::default(),
        }
    }
}

impl CliConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    /// Load configuration from `path`, or from the first standard location
    /// that exists
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand(&p.to_string_lossy())
        } else {
            [Self::default_path(), PathBuf::from(SYSTEM_CONFIG_PATH)]
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: CliConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.bridge.cache_dir = expand(&config.bridge.cache_dir.to_string_lossy());

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load from the standard locations, falling back to defaults
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Per-user configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("xr-bridge").join("config.toml")
        } else {
            PathBuf::from(SYSTEM_CONFIG_PATH)
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.usb.usbfs_root.trim().is_empty() {
            return Err(anyhow!("usb.usbfs_root must not be empty"));
        }

        self.bridge
            .validate()
            .context("Invalid [bridge] section")?;

        Ok(())
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}
