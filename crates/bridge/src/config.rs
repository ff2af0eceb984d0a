//! Bridge configuration

use common::DEFAULT_ORIENTATION_CAPACITY;
use protocol::{ImuFrequency, ImuMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the device bridge
///
/// # Example Configuration
/// ```toml
/// imu_frequency = "120hz"
/// orientation_buffer = 4
/// strict_3d = true
/// permission_wait_secs = 15
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Sampling rate requested when the IMU is enabled
    #[serde(default)]
    pub imu_frequency: ImuFrequency,
    /// IMU stream opened by `set_imu_enabled`
    #[serde(default)]
    pub imu_mode: ImuMode,
    /// Orientation samples buffered before the oldest is dropped
    #[serde(default = "BridgeConfig::default_orientation_buffer")]
    pub orientation_buffer: usize,
    /// Directory handed to the SDK for its calibration cache
    #[serde(default = "BridgeConfig::default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Fail `set_3d_enabled` when the SDK has no 3D call instead of
    /// keeping a local flag
    #[serde(default)]
    pub strict_3d: bool,
    /// Upper bound used by `initialize_and_wait` while a permission prompt is open
    #[serde(default = "BridgeConfig::default_permission_wait")]
    pub permission_wait_secs: u64,
    /// SDK log level, forwarded once per session
    #[serde(default)]
    pub native_log_level: Option<i32>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            imu_frequency: ImuFrequency::default(),
            imu_mode: ImuMode::default(),
            orientation_buffer: Self::default_orientation_buffer(),
            cache_dir: Self::default_cache_dir(),
            strict_3d: false,
            permission_wait_secs: Self::default_permission_wait(),
            native_log_level: None,
        }
    }
}

impl BridgeConfig {
    fn default_orientation_buffer() -> usize {
        DEFAULT_ORIENTATION_CAPACITY
    }

    fn default_cache_dir() -> PathBuf {
        if let Some(cache_dir) = dirs::cache_dir() {
            cache_dir.join("xr-bridge")
        } else {
            PathBuf::from("/tmp/xr-bridge")
        }
    }

    fn default_permission_wait() -> u64 {
        30
    }

    pub fn permission_wait(&self) -> Duration {
        Duration::from_secs(self.permission_wait_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> common::Result<()> {
        if self.orientation_buffer == 0 {
            return Err(common::Error::Config(
                "orientation_buffer must be at least 1".to_string(),
            ));
        }
        if self.orientation_buffer > 1024 {
            return Err(common::Error::Config(format!(
                "orientation_buffer {} is too large (max 1024)",
                self.orientation_buffer
            )));
        }
        if self.permission_wait_secs == 0 {
            return Err(common::Error::Config(
                "permission_wait_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
