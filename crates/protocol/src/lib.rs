//! Data model for the XR glasses device bridge
//!
//! This crate defines the value types that flow through the bridge: the USB
//! match table and device descriptors, orientation samples and the recenter
//! offset, lifecycle events, and the native status codes. It also decodes the
//! IMU block delivered across the native boundary.
//!
//! Nothing here performs I/O.
//!
//! # Example
//!
//! ```
//! use protocol::{decode_imu_block, Quaternion};
//!
//! let mut block = vec![0u8; 20];
//! block[0..4].copy_from_slice(&1.5f32.to_le_bytes());
//! block[4..8].copy_from_slice(&(-2.0f32).to_le_bytes());
//! block[8..12].copy_from_slice(&90.0f32.to_le_bytes());
//!
//! let sample = decode_imu_block(&block, 42).unwrap();
//! assert_eq!(sample.roll, 1.5);
//! assert_eq!(sample.quaternion, Quaternion::IDENTITY);
//! ```

pub mod error;
pub mod events;
pub mod imu;
pub mod orientation;
pub mod status;
pub mod types;

pub use error::{ProtocolError, Result};
pub use events::LifecycleEvent;
pub use imu::{IMU_BLOCK_FULL_LEN, IMU_BLOCK_MIN_LEN, decode_imu_block};
pub use orientation::{OrientationOffset, OrientationSample, Quaternion};
pub use status::Status;
pub use types::{
    DeviceDescriptor, DeviceKey, DeviceType, ImuFrequency, ImuMode, PermissionState,
    SUPPORTED_PRODUCTS, SupportedProduct, VITURE_VENDOR_ID, lookup_product,
};
