//! Bridge error types

use protocol::Status;
use thiserror::Error;

/// Failure of a bridge control operation
///
/// Every variant maps to a signed status via [`BridgeError::status`]. Native
/// failures keep the SDK's own negative code so callers can surface it
/// verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// No supported glasses are attached
    #[error("No supported glasses found")]
    NotFound,

    /// The user declined the USB access prompt
    #[error("USB permission denied")]
    PermissionDenied,

    /// A native SDK call returned a failure status
    #[error("{message} (status {code})")]
    Native { code: i32, message: String },

    /// Operation requires a connected session
    #[error("Glasses not initialized")]
    NotInitialized,

    /// The connected hardware does not support the requested feature
    #[error("Not supported by connected glasses: {0}")]
    Unsupported(String),

    /// A release or detach overtook this request
    #[error("Request superseded by release or disconnect")]
    Superseded,

    /// The USB host layer failed
    #[error("USB host error: {0}")]
    Host(String),

    /// The bridge task is no longer running
    #[error("Bridge is shut down")]
    Shutdown,
}

impl BridgeError {
    /// Build a native failure for `step` from the status it returned
    pub fn native(step: &str, status: Status) -> Self {
        BridgeError::Native {
            code: status.code(),
            message: format!("Native {} failed", step),
        }
    }

    pub fn status(&self) -> Status {
        match self {
            BridgeError::NotFound => Status::NOT_FOUND,
            BridgeError::PermissionDenied => Status::PERMISSION_DENIED,
            BridgeError::Native { code, .. } => Status(*code),
            BridgeError::NotInitialized => Status::NOT_INITIALIZED,
            BridgeError::Unsupported(_) => Status::UNSUPPORTED,
            BridgeError::Superseded => Status::SUPERSEDED,
            BridgeError::Host(_) => Status::HOST_FAILURE,
            BridgeError::Shutdown => Status::SHUTDOWN,
        }
    }

    pub fn code(&self) -> i32 {
        self.status().code()
    }

    /// True when retrying `initialize()` from idle can succeed without user action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::NotFound
                | BridgeError::Native { .. }
                | BridgeError::Superseded
                | BridgeError::Host(_)
        )
    }
}

impl From<rusb::Error> for BridgeError {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::Access => BridgeError::PermissionDenied,
            rusb::Error::NoDevice | rusb::Error::NotFound => BridgeError::NotFound,
            other => BridgeError::Host(other.to_string()),
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => BridgeError::PermissionDenied,
            std::io::ErrorKind::NotFound => BridgeError::NotFound,
            _ => BridgeError::Host(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_error_keeps_code() {
        let err = BridgeError::native("initialize", Status(-7));
        assert_eq!(err.code(), -7);
        assert_eq!(err.to_string(), "Native initialize failed (status -7)");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(BridgeError::NotFound.status(), Status::NOT_FOUND);
        assert_eq!(BridgeError::NotInitialized.code(), -1003);
        assert!(BridgeError::NotFound.is_retryable());
        assert!(!BridgeError::PermissionDenied.is_retryable());
        assert!(!BridgeError::NotInitialized.is_retryable());
    }

    #[test]
    fn test_from_io_error() {
        let err: BridgeError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "usbfs").into();
        assert_eq!(err, BridgeError::PermissionDenied);
    }

    #[test]
    fn test_from_rusb_error() {
        assert_eq!(BridgeError::from(rusb::Error::Access), BridgeError::PermissionDenied);
        assert_eq!(BridgeError::from(rusb::Error::NoDevice), BridgeError::NotFound);
        assert!(matches!(
            BridgeError::from(rusb::Error::Busy),
            BridgeError::Host(_)
        ));
    }
}
