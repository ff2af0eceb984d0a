//! IMU block decoding
//!
//! The native layer hands over a contiguous little-endian block:
//!
//! ```text
//! offset  0      4      8      12 ........ 20     24     28     32     36
//!         | roll | pitch| yaw  | reserved  | qw   | qx   | qy   | qz   |
//! ```
//!
//! Blocks of 20..36 bytes carry roll/pitch/yaw only and decode with an
//! identity quaternion.

use crate::error::{ProtocolError, Result};
use crate::orientation::{OrientationSample, Quaternion};
use byteorder::{ByteOrder, LittleEndian};

/// Minimum block length (roll/pitch/yaw plus reserved words)
pub const IMU_BLOCK_MIN_LEN: usize = 20;

/// Block length that includes the quaternion
pub const IMU_BLOCK_FULL_LEN: usize = 36;

const QUATERNION_OFFSET: usize = 20;

/// Decode one IMU block into an orientation sample
pub fn decode_imu_block(block: &[u8], timestamp: u64) -> Result<OrientationSample> {
    if block.len() < IMU_BLOCK_MIN_LEN {
        return Err(ProtocolError::BlockTooShort {
            needed: IMU_BLOCK_MIN_LEN,
            actual: block.len(),
        });
    }

    let quaternion = if block.len() >= IMU_BLOCK_FULL_LEN {
        let q = &block[QUATERNION_OFFSET..IMU_BLOCK_FULL_LEN];
        Quaternion {
            w: LittleEndian::read_f32(&q[0..4]),
            x: LittleEndian::read_f32(&q[4..8]),
            y: LittleEndian::read_f32(&q[8..12]),
            z: LittleEndian::read_f32(&q[12..16]),
        }
    } else {
        Quaternion::IDENTITY
    };

    Ok(OrientationSample {
        roll: LittleEndian::read_f32(&block[0..4]),
        pitch: LittleEndian::read_f32(&block[4..8]),
        yaw: LittleEndian::read_f32(&block[8..12]),
        quaternion,
        timestamp,
    })
}
