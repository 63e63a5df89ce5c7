use thiserror::Error;

use crate::types::Channel;

/// Error taxonomy shared by every core operation.
///
/// Several [`CoreError`] variants fold into one kind so callers can match on
/// the class of failure without caring about the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotSupported,
    Hardware,
    InitFail,
    Channel,
    BufferRange,
    NotConfigured,
    Mode,
    DataLength,
    ResourceBusy,
    BufferOverflow,
    InvalidParameter,
    /// Port used after release, or released twice. A programming error.
    NotInitialized,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    // Capability errors
    #[error("Not supported by hardware: {0}")]
    NotSupported(&'static str),

    // Hardware and setup errors
    #[error("Hardware error: {0}")]
    Hardware(String),
    #[error("Initialisation failed: {0}")]
    InitFail(String),

    // Channel errors
    #[error("Channel {0:?} is not provided by this hardware")]
    InvalidChannel(Channel),
    #[error("Channel {0:?} is already open")]
    ChannelInUse(Channel),

    // Buffer errors
    #[error("Buffer index {0} out of range")]
    BufferRange(u8),
    #[error("Buffer {0} is not configured")]
    BufferNotConfigured(u8),
    #[error("Buffer {0} has no FIFO attached")]
    FifoNotConfigured(u8),
    #[error("Buffer {0} is configured for the other direction")]
    WrongDirection(u8),
    #[error("Buffer {0} is disabled")]
    BufferDisabled(u8),

    // Mode errors
    #[error("CAN bus not started")]
    BusNotStarted,
    #[error("Operation not allowed in current mode: {0}")]
    ModeError(&'static str),

    // Payload errors
    #[error("Data length error: {0}")]
    DataLength(String),

    // Resource errors
    #[error("Resource busy: {0}")]
    ResourceBusy(&'static str),
    #[error("FIFO full: {written} written, {dropped} dropped")]
    BufferOverflow { written: usize, dropped: usize },

    // Generic errors
    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("Port not initialised or already released")]
    NotInitialized,
}

impl CoreError {
    /// Returns the taxonomy class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotSupported(_) => ErrorKind::NotSupported,
            CoreError::Hardware(_) => ErrorKind::Hardware,
            CoreError::InitFail(_) => ErrorKind::InitFail,
            CoreError::InvalidChannel(_) => ErrorKind::Channel,
            CoreError::ChannelInUse(_) => ErrorKind::ResourceBusy,
            CoreError::BufferRange(_) => ErrorKind::BufferRange,
            CoreError::BufferNotConfigured(_) => ErrorKind::NotConfigured,
            CoreError::FifoNotConfigured(_) => ErrorKind::NotConfigured,
            CoreError::WrongDirection(_) => ErrorKind::Mode,
            CoreError::BufferDisabled(_) => ErrorKind::Mode,
            CoreError::BusNotStarted => ErrorKind::Mode,
            CoreError::ModeError(_) => ErrorKind::Mode,
            CoreError::DataLength(_) => ErrorKind::DataLength,
            CoreError::ResourceBusy(_) => ErrorKind::ResourceBusy,
            CoreError::BufferOverflow { .. } => ErrorKind::BufferOverflow,
            CoreError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            CoreError::NotInitialized => ErrorKind::NotInitialized,
        }
    }

    /// True for errors caused by misuse of a released port
    pub fn is_programming_error(&self) -> bool {
        matches!(self, CoreError::NotInitialized)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_errors_map_to_distinct_kinds() {
        assert_eq!(CoreError::BufferRange(0).kind(), ErrorKind::BufferRange);
        assert_eq!(
            CoreError::BufferNotConfigured(3).kind(),
            ErrorKind::NotConfigured
        );
        assert_ne!(
            CoreError::BufferRange(40).kind(),
            CoreError::BufferNotConfigured(4).kind()
        );
    }

    #[test]
    fn display_carries_payload() {
        let err = CoreError::BufferOverflow {
            written: 4,
            dropped: 2,
        };
        assert_eq!(err.to_string(), "FIFO full: 4 written, 2 dropped");
        assert!(CoreError::NotInitialized.is_programming_error());
        assert!(!CoreError::BusNotStarted.is_programming_error());
    }
}
