//! Test utilities for the XR HUD bridge
//!
//! Provides builders for descriptors, orientation samples and raw IMU blocks,
//! plus a timeout helper for async tests.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_descriptor;
//!
//! let device = create_mock_descriptor(0x1014, true);
//! assert_eq!(device.vendor_id, 0x35CA);
//! assert!(device.has_permission());
//! ```

use byteorder::{ByteOrder, LittleEndian};
use protocol::{
    DeviceDescriptor, IMU_BLOCK_FULL_LEN, IMU_BLOCK_MIN_LEN, OrientationSample, PermissionState,
    Quaternion, VITURE_VENDOR_ID, lookup_product,
};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a descriptor for a supported glasses variant
///
/// The product name comes from the match table; unknown product IDs get a
/// generic name.
pub fn create_mock_descriptor(product_id: u16, granted: bool) -> DeviceDescriptor {
    let product_name = lookup_product(VITURE_VENDOR_ID, product_id)
        .map(|p| p.name.to_string())
        .unwrap_or_else(|| format!("Test Glasses {:04x}", product_id));

    DeviceDescriptor {
        vendor_id: VITURE_VENDOR_ID,
        product_id,
        product_name,
        bus_number: 1,
        device_address: (product_id & 0x7f) as u8,
        permission: if granted {
            PermissionState::Granted
        } else {
            PermissionState::NotGranted
        },
    }
}

/// Create a descriptor for an arbitrary (non-glasses) USB device
pub fn create_foreign_descriptor(vendor_id: u16, product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id,
        product_id,
        product_name: format!("Other Device {:04x}:{:04x}", vendor_id, product_id),
        bus_number: 2,
        device_address: (product_id & 0x7f) as u8,
        permission: PermissionState::Granted,
    }
}

/// Create an orientation sample with an identity quaternion
pub fn create_sample(roll: f32, pitch: f32, yaw: f32, timestamp: u64) -> OrientationSample {
    OrientationSample {
        roll,
        pitch,
        yaw,
        quaternion: Quaternion::IDENTITY,
        timestamp,
    }
}

/// Build a raw IMU block as the native layer delivers it
///
/// Without a quaternion the block is the 20-byte minimum; with one it is the
/// full 36 bytes.
pub fn create_imu_block(roll: f32, pitch: f32, yaw: f32, quaternion: Option<Quaternion>) -> Vec<u8> {
    let len = if quaternion.is_some() {
        IMU_BLOCK_FULL_LEN
    } else {
        IMU_BLOCK_MIN_LEN
    };
    let mut block = vec![0u8; len];

    LittleEndian::write_f32(&mut block[0..4], roll);
    LittleEndian::write_f32(&mut block[4..8], pitch);
    LittleEndian::write_f32(&mut block[8..12], yaw);

    if let Some(q) = quaternion {
        LittleEndian::write_f32(&mut block[20..24], q.w);
        LittleEndian::write_f32(&mut block[24..28], q.x);
        LittleEndian::write_f32(&mut block[28..32], q.y);
        LittleEndian::write_f32(&mut block[32..36], q.z);
    }

    block
}

/// Run a future with a timeout
///
/// # Example
/// ```
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
/// assert_eq!(result, 42);
/// # }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
