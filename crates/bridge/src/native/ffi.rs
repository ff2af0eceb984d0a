//! Direct linkage against the vendor glasses SDK
//!
//! The SDK's callbacks carry no user-data pointer, so the registered
//! [`NativeCallbacks`] target lives in a process-wide slot that the
//! trampolines read. Only [`FfiSdk`] writes that slot.

use super::{NativeCallbacks, NativeSdk, POSE_FLOATS, STATUS_FAILURE, pose_to_block};
use protocol::VITURE_VENDOR_ID;
use std::ffi::{CString, c_char, c_int, c_void};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::{debug, error, info, warn};

type ProviderHandle = *mut c_void;
/// `data` points at `POSE_FLOATS` floats: roll, pitch, yaw, qw, qx, qy, qz
type ImuPoseCallback = extern "C" fn(data: *const f32, timestamp: u64);
type StateCallback = extern "C" fn(state_id: c_int, value: c_int);

#[link(name = "viture_glasses_provider")]
unsafe extern "C" {
    fn xr_device_provider_create(product_id: c_int, file_descriptor: c_int) -> ProviderHandle;
    fn xr_device_provider_initialize(
        handle: ProviderHandle,
        reserved: *mut c_void,
        cache_dir: *const c_char,
    ) -> c_int;
    fn xr_device_provider_start(handle: ProviderHandle) -> c_int;
    fn xr_device_provider_stop(handle: ProviderHandle) -> c_int;
    fn xr_device_provider_shutdown(handle: ProviderHandle) -> c_int;
    fn xr_device_provider_destroy(handle: ProviderHandle);
    fn xr_device_provider_get_device_type(handle: ProviderHandle) -> c_int;
    fn xr_device_provider_is_product_id_valid(product_id: c_int) -> bool;
    fn xr_device_provider_register_imu_pose_callback(
        handle: ProviderHandle,
        callback: Option<ImuPoseCallback>,
    ) -> c_int;
    fn xr_device_provider_register_state_callback(
        handle: ProviderHandle,
        callback: Option<StateCallback>,
    ) -> c_int;
    fn xr_device_provider_open_imu(handle: ProviderHandle, mode: u8, frequency: u8) -> c_int;
    fn xr_device_provider_close_imu(handle: ProviderHandle, mode: u8) -> c_int;
    fn xr_device_provider_set_log_level(level: c_int);
}

/// Target of the C callbacks
static CALLBACK_TARGET: RwLock<Option<Arc<dyn NativeCallbacks>>> = RwLock::new(None);

static SDK_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Product ID used to probe the library
const PROBE_PRODUCT_ID: u16 = 0x1011;

/// Capability probe, evaluated once per process
pub fn sdk_available() -> bool {
    *SDK_AVAILABLE.get_or_init(|| {
        // SAFETY: pure lookup in the SDK's product table
        let available = unsafe { xr_device_provider_is_product_id_valid(PROBE_PRODUCT_ID as c_int) };
        info!(
            "Vendor SDK probe for {:04x}:{:04x}: {}",
            VITURE_VENDOR_ID,
            PROBE_PRODUCT_ID,
            if available { "available" } else { "unavailable" }
        );
        available
    })
}

fn callback_target() -> Option<Arc<dyn NativeCallbacks>> {
    match CALLBACK_TARGET.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn set_callback_target(target: Option<Arc<dyn NativeCallbacks>>) {
    match CALLBACK_TARGET.write() {
        Ok(mut guard) => *guard = target,
        Err(poisoned) => *poisoned.into_inner() = target,
    }
}

extern "C" fn imu_pose_trampoline(data: *const f32, timestamp: u64) {
    if data.is_null() {
        return;
    }
    let result = std::panic::catch_unwind(|| {
        if let Some(target) = callback_target() {
            let mut pose = [0f32; POSE_FLOATS];
            // SAFETY: the SDK passes POSE_FLOATS readable floats for the callback's duration
            unsafe { std::ptr::copy_nonoverlapping(data, pose.as_mut_ptr(), POSE_FLOATS) };
            target.on_imu(&pose_to_block(&pose), timestamp);
        }
    });
    if result.is_err() {
        error!("Panic in IMU callback, sample dropped");
    }
}

extern "C" fn state_trampoline(state_id: c_int, value: c_int) {
    let result = std::panic::catch_unwind(|| {
        if let Some(target) = callback_target() {
            target.on_state(state_id, value);
        }
    });
    if result.is_err() {
        error!("Panic in state callback, event dropped");
    }
}

/// Vendor SDK bound by direct linkage
pub struct FfiSdk {
    handle: ProviderHandle,
}

// SAFETY: the provider handle is only used through &mut self, one thread at a time
unsafe impl Send for FfiSdk {}

impl FfiSdk {
    pub fn new() -> Self {
        Self {
            handle: std::ptr::null_mut(),
        }
    }

    fn with_handle(&self, call: impl FnOnce(ProviderHandle) -> c_int) -> i32 {
        if self.handle.is_null() {
            return STATUS_FAILURE;
        }
        call(self.handle)
    }
}

impl Default for FfiSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeSdk for FfiSdk {
    fn is_available(&self) -> bool {
        sdk_available()
    }

    fn is_product_id_valid(&self, product_id: u16) -> bool {
        // SAFETY: pure lookup
        unsafe { xr_device_provider_is_product_id_valid(product_id as c_int) }
    }

    fn set_log_level(&mut self, level: i32) {
        // SAFETY: sets a global in the SDK
        unsafe { xr_device_provider_set_log_level(level) }
    }

    fn create(&mut self, product_id: u16, fd: RawFd) -> bool {
        if !self.handle.is_null() {
            warn!("Native provider already allocated");
            return false;
        }
        // SAFETY: fd is an open usbfs connection owned by the session
        let handle = unsafe { xr_device_provider_create(product_id as c_int, fd) };
        if handle.is_null() {
            error!("xr_device_provider_create returned null");
            return false;
        }
        debug!("Native provider created for product {:04x}", product_id);
        self.handle = handle;
        true
    }

    fn initialize(&mut self, cache_dir: Option<&Path>) -> i32 {
        let cache_dir = cache_dir.and_then(|p| CString::new(p.as_os_str().as_bytes()).ok());
        let cache_ptr = cache_dir
            .as_ref()
            .map(|c| c.as_ptr())
            .unwrap_or(std::ptr::null());
        // SAFETY: handle is live; cache_ptr is null or a valid C string for the call
        self.with_handle(|h| unsafe {
            xr_device_provider_initialize(h, std::ptr::null_mut(), cache_ptr)
        })
    }

    fn start(&mut self) -> i32 {
        // SAFETY: handle is live
        self.with_handle(|h| unsafe { xr_device_provider_start(h) })
    }

    fn stop(&mut self) -> i32 {
        // SAFETY: handle is live
        self.with_handle(|h| unsafe { xr_device_provider_stop(h) })
    }

    fn shutdown(&mut self) {
        // SAFETY: handle is live
        let status = self.with_handle(|h| unsafe { xr_device_provider_shutdown(h) });
        if status < 0 {
            debug!("xr_device_provider_shutdown returned {}", status);
        }
    }

    fn destroy(&mut self) {
        if self.handle.is_null() {
            return;
        }
        // SAFETY: handle is live and never used after this call
        unsafe { xr_device_provider_destroy(self.handle) };
        self.handle = std::ptr::null_mut();
        set_callback_target(None);
    }

    fn device_type(&self) -> i32 {
        // SAFETY: handle is live
        self.with_handle(|h| unsafe { xr_device_provider_get_device_type(h) })
    }

    fn register_callbacks(&mut self, callbacks: Arc<dyn NativeCallbacks>) {
        set_callback_target(Some(callbacks));
        // SAFETY: trampolines are 'static functions
        let imu = self.with_handle(|h| unsafe {
            xr_device_provider_register_imu_pose_callback(h, Some(imu_pose_trampoline))
        });
        let state = self.with_handle(|h| unsafe {
            xr_device_provider_register_state_callback(h, Some(state_trampoline))
        });
        if imu < 0 || state < 0 {
            warn!("Callback registration returned imu={} state={}", imu, state);
        }
    }

    fn clear_callbacks(&mut self) {
        // SAFETY: passing None unregisters
        self.with_handle(|h| unsafe { xr_device_provider_register_imu_pose_callback(h, None) });
        self.with_handle(|h| unsafe { xr_device_provider_register_state_callback(h, None) });
        set_callback_target(None);
    }

    fn open_imu(&mut self, mode: u8, frequency: u8) -> i32 {
        // SAFETY: handle is live
        self.with_handle(|h| unsafe { xr_device_provider_open_imu(h, mode, frequency) })
    }

    fn close_imu(&mut self, mode: u8) -> i32 {
        // SAFETY: handle is live
        self.with_handle(|h| unsafe { xr_device_provider_close_imu(h, mode) })
    }

    fn set_3d(&mut self, _enabled: bool) -> Option<i32> {
        // This SDK revision exposes no display-mode call
        None
    }
}

impl Drop for FfiSdk {
    fn drop(&mut self) {
        self.destroy();
    }
}
