//! USB host subsystem
//!
//! The bridge talks to the operating system's USB layer through the
//! [`UsbHost`] trait: listing attached devices, checking and requesting
//! access, and opening a device to obtain the file descriptor the SDK needs.
//!
//! Asynchronous OS notifications (hot-plug, permission answers) are delivered
//! as [`HostEvent`]s on a channel handed to the host at construction time.

pub mod enumerator;
pub mod rusb_host;

use crate::error::BridgeError;
use protocol::{DeviceDescriptor, DeviceKey};
use std::os::fd::OwnedFd;

pub use enumerator::DeviceEnumerator;
pub use rusb_host::RusbHost;

/// Notification from the OS USB layer
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A device was plugged in
    Attached(DeviceDescriptor),
    /// A device was removed
    Detached(DeviceKey),
    /// The user answered a permission prompt
    PermissionResult { device: DeviceKey, granted: bool },
}

/// Access to the platform USB layer
pub trait UsbHost: Send + Sync + 'static {
    /// All attached devices, supported or not
    fn attached_devices(&self) -> Result<Vec<DeviceDescriptor>, BridgeError>;

    /// Whether the OS already granted access to this device
    fn has_permission(&self, device: &DeviceKey) -> bool;

    /// Show the platform permission prompt
    ///
    /// The answer arrives later as [`HostEvent::PermissionResult`].
    fn request_permission(&self, device: &DeviceDescriptor) -> Result<(), BridgeError>;

    /// Open the device and return the connection's file descriptor
    fn open(&self, device: &DeviceDescriptor) -> Result<OwnedFd, BridgeError>;
}
