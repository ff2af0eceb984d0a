//! Orientation samples and the recenter offset

use serde::{Deserialize, Serialize};

/// Unit quaternion (w, x, y, z)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// One orientation reading from the glasses
///
/// Angles are degrees on device-local axes. Samples are plain values: applying
/// an offset yields a new sample and leaves the original untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrientationSample {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub quaternion: Quaternion,
    /// Hardware timestamp, monotonically increasing per session
    pub timestamp: u64,
}

impl OrientationSample {
    /// Return this sample as seen through `offset`
    ///
    /// Only roll/pitch/yaw are shifted; the quaternion passes through.
    pub fn with_offset(&self, offset: &OrientationOffset) -> OrientationSample {
        OrientationSample {
            roll: self.roll - offset.roll,
            pitch: self.pitch - offset.pitch,
            yaw: self.yaw - offset.yaw,
            ..*self
        }
    }
}

/// User-chosen zero reference, subtracted from every sample
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OrientationOffset {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl OrientationOffset {
    pub const ZERO: OrientationOffset = OrientationOffset {
        roll: 0.0,
        pitch: 0.0,
        yaw: 0.0,
    };

    /// Recenter on `current`, the sample as currently reported
    ///
    /// Repeated resets accumulate: the captured reading is added to the
    /// existing offset, so the next sample equal to the raw reading at reset
    /// time reads as zero.
    pub fn recenter(&mut self, current: &OrientationSample) {
        self.roll += current.roll;
        self.pitch += current.pitch;
        self.yaw += current.yaw;
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}
