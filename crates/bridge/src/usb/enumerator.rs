//! Device enumeration
//!
//! Scans the attached USB devices for a supported glasses signature.

use crate::error::BridgeError;
use crate::usb::UsbHost;
use protocol::{DeviceDescriptor, lookup_product};
use std::sync::Arc;
use tracing::{debug, info};

/// Finds supported glasses among the attached USB devices
///
/// Holds no state beyond the host it reads from; every call rescans.
#[derive(Clone)]
pub struct DeviceEnumerator {
    host: Arc<dyn UsbHost>,
}

impl DeviceEnumerator {
    pub fn new(host: Arc<dyn UsbHost>) -> Self {
        Self { host }
    }

    /// Return the first supported device, or `None` when nothing matches
    ///
    /// Only a failing host produces an error; "not found" is not one.
    pub fn find(&self) -> Result<Option<DeviceDescriptor>, BridgeError> {
        let found = self.find_all()?.into_iter().next();

        match &found {
            Some(device) => info!(
                "Found {} ({:04x}:{:04x}) on bus {} addr {}",
                device.product_name,
                device.vendor_id,
                device.product_id,
                device.bus_number,
                device.device_address
            ),
            None => debug!("No supported glasses attached"),
        }

        Ok(found)
    }

    /// Return every supported device in bus order
    pub fn find_all(&self) -> Result<Vec<DeviceDescriptor>, BridgeError> {
        let devices = self.host.attached_devices()?;
        let total = devices.len();

        let mut matches: Vec<DeviceDescriptor> = devices
            .into_iter()
            .filter(|d| Self::is_supported(d))
            .collect();
        matches.sort_by_key(|d| (d.bus_number, d.device_address));

        debug!("Scanned {} USB devices, {} supported", total, matches.len());
        Ok(matches)
    }

    /// Check a descriptor against the match table
    pub fn is_supported(device: &DeviceDescriptor) -> bool {
        lookup_product(device.vendor_id, device.product_id).is_some()
    }
}
