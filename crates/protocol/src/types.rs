//! Device and IMU type definitions
//!
//! This module defines the USB match table for supported glasses, the
//! descriptor produced by enumeration, and the enumerations shared with the
//! native SDK (device generation, IMU mode and sampling frequency).

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// USB vendor ID shared by every supported glasses variant
pub const VITURE_VENDOR_ID: u16 = 0x35CA;

/// One row of the device match table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedProduct {
    /// USB product ID
    pub product_id: u16,
    /// Marketing name used when the device reports no product string
    pub name: &'static str,
    /// Hardware generation of this variant
    pub device_type: DeviceType,
}

/// Supported (vendor, product) pairs
///
/// Every entry shares [`VITURE_VENDOR_ID`]. Order matters only for display.
pub const SUPPORTED_PRODUCTS: [SupportedProduct; 6] = [
    SupportedProduct {
        product_id: 0x1011,
        name: "Viture One",
        device_type: DeviceType::Gen1,
    },
    SupportedProduct {
        product_id: 0x1012,
        name: "Viture One Lite",
        device_type: DeviceType::Gen1,
    },
    SupportedProduct {
        product_id: 0x1013,
        name: "Viture Pro",
        device_type: DeviceType::Gen1,
    },
    SupportedProduct {
        product_id: 0x1014,
        name: "Viture Luma",
        device_type: DeviceType::Gen2,
    },
    SupportedProduct {
        product_id: 0x1015,
        name: "Viture Luma Pro",
        device_type: DeviceType::Gen2,
    },
    SupportedProduct {
        product_id: 0x1016,
        name: "Viture Beast",
        device_type: DeviceType::Carina,
    },
];

/// Look up a (vendor, product) pair in the match table
pub fn lookup_product(vendor_id: u16, product_id: u16) -> Option<&'static SupportedProduct> {
    if vendor_id != VITURE_VENDOR_ID {
        return None;
    }
    SUPPORTED_PRODUCTS
        .iter()
        .find(|p| p.product_id == product_id)
}

/// Hardware generation reported by the native layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceType {
    Gen1,
    Gen2,
    Carina,
    /// Any code the bridge does not recognise
    Unknown,
}

impl DeviceType {
    /// Classify a raw device-type code returned by the SDK
    ///
    /// Unrecognised codes (including negative error statuses) map to
    /// `Unknown` rather than failing.
    pub fn from_native(code: i32) -> Self {
        match code {
            0 => DeviceType::Gen1,
            1 => DeviceType::Gen2,
            2 => DeviceType::Carina,
            _ => DeviceType::Unknown,
        }
    }

    /// Raw code understood by the SDK, if any
    pub fn native_code(self) -> Option<i32> {
        match self {
            DeviceType::Gen1 => Some(0),
            DeviceType::Gen2 => Some(1),
            DeviceType::Carina => Some(2),
            DeviceType::Unknown => None,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Gen1 => "GEN1",
            DeviceType::Gen2 => "GEN2",
            DeviceType::Carina => "CARINA",
            DeviceType::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Whether the OS has granted this process access to a USB device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    NotGranted,
}

/// Identity of one physical USB attachment
///
/// Vendor and product IDs alone are not unique when two identical devices
/// are plugged in, so the bus location is part of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub device_address: u8,
}

/// Device descriptor produced by a single enumeration pass
///
/// Immutable once created; a new scan produces new descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Product string, or the match-table name when the device has none
    pub product_name: String,
    /// Bus number
    pub bus_number: u8,
    /// Device address on the bus
    pub device_address: u8,
    /// Access permission at scan time
    pub permission: PermissionState,
}

impl DeviceDescriptor {
    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            bus_number: self.bus_number,
            device_address: self.device_address,
        }
    }

    /// Generation implied by the product ID
    pub fn device_type(&self) -> DeviceType {
        lookup_product(self.vendor_id, self.product_id)
            .map(|p| p.device_type)
            .unwrap_or(DeviceType::Unknown)
    }

    pub fn has_permission(&self) -> bool {
        self.permission == PermissionState::Granted
    }
}

/// IMU stream selector passed to `open_imu` / `close_imu`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImuMode {
    /// Fused pose (roll/pitch/yaw + quaternion)
    #[default]
    Pose,
    /// Raw gyro/accel stream
    Raw,
}

impl ImuMode {
    pub fn native_code(self) -> u8 {
        match self {
            ImuMode::Pose => 0,
            ImuMode::Raw => 1,
        }
    }
}

/// Sampling frequencies supported by the IMU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImuFrequency {
    #[default]
    #[serde(rename = "60hz")]
    Hz60,
    #[serde(rename = "120hz")]
    Hz120,
    #[serde(rename = "240hz")]
    Hz240,
}

impl ImuFrequency {
    pub fn hertz(self) -> u32 {
        match self {
            ImuFrequency::Hz60 => 60,
            ImuFrequency::Hz120 => 120,
            ImuFrequency::Hz240 => 240,
        }
    }

    /// Frequency selector understood by the SDK
    pub fn native_code(self) -> u8 {
        match self {
            ImuFrequency::Hz60 => 0,
            ImuFrequency::Hz120 => 1,
            ImuFrequency::Hz240 => 2,
        }
    }

    pub fn from_hertz(hz: u32) -> Result<Self, ProtocolError> {
        match hz {
            60 => Ok(ImuFrequency::Hz60),
            120 => Ok(ImuFrequency::Hz120),
            240 => Ok(ImuFrequency::Hz240),
            other => Err(ProtocolError::UnsupportedFrequency(other)),
        }
    }
}
