//! Native SDK boundary
//!
//! [`NativeSdk`] mirrors the vendor library's C surface one call per
//! operation, returning the library's raw status codes. [`NativeSession`]
//! wraps it with the session state machine and is the only thing the facade
//! talks to.
//!
//! With the `vendor-sdk` feature the SDK is linked directly (see `ffi`).
//! Without it, [`default_sdk`] returns a stub whose capability probe reports
//! the hardware bridge as unavailable.

#[cfg(feature = "vendor-sdk")]
pub mod ffi;
pub mod session;

use protocol::IMU_BLOCK_FULL_LEN;
use std::os::fd::RawFd;
use std::path::Path;
use std::sync::Arc;

pub use session::{NativeSession, SessionState};

/// Generic failure status used by SDK implementations without a specific code
pub const STATUS_FAILURE: i32 = -1;

/// Receiver for callbacks fired on the SDK's own thread
///
/// Implementations must not block and must not panic across the boundary.
pub trait NativeCallbacks: Send + Sync + 'static {
    /// One IMU block as laid out by the SDK, with its hardware timestamp
    fn on_imu(&self, block: &[u8], timestamp: u64);

    /// Glasses state change
    fn on_state(&self, state_id: i32, value: i32);
}

/// Raw vendor SDK surface
///
/// Status-returning calls use `0` for success and negative values for
/// failures. Exactly one instance exists per process; the facade moves it into
/// a [`NativeSession`] while connected.
pub trait NativeSdk: Send + 'static {
    /// Capability probe: whether the vendor library is usable in this process
    fn is_available(&self) -> bool;

    /// The library's own product-ID check
    fn is_product_id_valid(&self, product_id: u16) -> bool;

    fn set_log_level(&mut self, level: i32);

    /// Allocate the native session for an open USB connection
    fn create(&mut self, product_id: u16, fd: RawFd) -> bool;

    /// Protocol handshake
    fn initialize(&mut self, cache_dir: Option<&Path>) -> i32;

    fn start(&mut self) -> i32;

    fn stop(&mut self) -> i32;

    /// Shut down the session prior to destroying it
    fn shutdown(&mut self);

    /// Release all native resources of the session
    fn destroy(&mut self);

    /// Raw device-type code of the connected glasses
    fn device_type(&self) -> i32;

    /// Route IMU and state callbacks to `callbacks`, replacing any previous target
    fn register_callbacks(&mut self, callbacks: Arc<dyn NativeCallbacks>);

    /// Stop routing callbacks and release the registered target
    fn clear_callbacks(&mut self);

    fn open_imu(&mut self, mode: u8, frequency: u8) -> i32;

    fn close_imu(&mut self, mode: u8) -> i32;

    /// Switch the display between 2D and 3D
    ///
    /// Returns `None` when this SDK revision has no such call.
    fn set_3d(&mut self, enabled: bool) -> Option<i32>;
}

/// SDK used when the vendor library is not linked into this build
pub struct UnavailableSdk;

impl NativeSdk for UnavailableSdk {
    fn is_available(&self) -> bool {
        false
    }

    fn is_product_id_valid(&self, _product_id: u16) -> bool {
        false
    }

    fn set_log_level(&mut self, _level: i32) {}

    fn create(&mut self, _product_id: u16, _fd: RawFd) -> bool {
        false
    }

    fn initialize(&mut self, _cache_dir: Option<&Path>) -> i32 {
        STATUS_FAILURE
    }

    fn start(&mut self) -> i32 {
        STATUS_FAILURE
    }

    fn stop(&mut self) -> i32 {
        STATUS_FAILURE
    }

    fn shutdown(&mut self) {}

    fn destroy(&mut self) {}

    fn device_type(&self) -> i32 {
        STATUS_FAILURE
    }

    fn register_callbacks(&mut self, _callbacks: Arc<dyn NativeCallbacks>) {}

    fn clear_callbacks(&mut self) {}

    fn open_imu(&mut self, _mode: u8, _frequency: u8) -> i32 {
        STATUS_FAILURE
    }

    fn close_imu(&mut self, _mode: u8) -> i32 {
        STATUS_FAILURE
    }

    fn set_3d(&mut self, _enabled: bool) -> Option<i32> {
        None
    }
}

/// The SDK for this build
#[cfg(feature = "vendor-sdk")]
pub fn default_sdk() -> Box<dyn NativeSdk> {
    Box::new(ffi::FfiSdk::new())
}

/// The SDK for this build
#[cfg(not(feature = "vendor-sdk"))]
pub fn default_sdk() -> Box<dyn NativeSdk> {
    Box::new(UnavailableSdk)
}

/// Whether this build can drive real hardware
///
/// Resolved once per process and cached.
pub fn hardware_bridge_available() -> bool {
    #[cfg(feature = "vendor-sdk")]
    {
        ffi::sdk_available()
    }
    #[cfg(not(feature = "vendor-sdk"))]
    {
        false
    }
}

/// Floats in one pose callback: roll, pitch, yaw, qw, qx, qy, qz
pub const POSE_FLOATS: usize = 7;

/// Lay a pose callback's floats out as an IMU block
///
/// Euler angles go at offsets 0, 4, 8 and the quaternion at 20..36; bytes
/// 12..20 stay zero.
#[cfg_attr(not(feature = "vendor-sdk"), allow(dead_code))]
pub(crate) fn pose_to_block(pose: &[f32; POSE_FLOATS]) -> [u8; IMU_BLOCK_FULL_LEN] {
    let mut block = [0u8; IMU_BLOCK_FULL_LEN];
    for (i, value) in pose[..3].iter().enumerate() {
        block[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }
    for (i, value) in pose[3..].iter().enumerate() {
        let offset = 20 + i * 4;
        block[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
    block
}
