//! Protocol error types

use thiserror::Error;

/// Errors raised while interpreting data from the native boundary
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// IMU block shorter than the roll/pitch/yaw prefix
    #[error("IMU block too short: needed {needed} bytes, got {actual}")]
    BlockTooShort { needed: usize, actual: usize },

    /// Frequency value outside the supported set
    #[error("Unsupported IMU frequency: {0} Hz")]
    UnsupportedFrequency(u32),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::BlockTooShort {
            needed: 20,
            actual: 12,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("IMU block too short"));
        assert!(msg.contains("20"));
        assert!(msg.contains("12"));
    }
}
