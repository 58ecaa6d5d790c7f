//! Error types for backend operations

use crate::device::{DeviceId, MemorySpace};

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors raised by memory managers, device adapters and the tracker
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// A memory manager could not provide the requested bytes
    #[error("failed to allocate {requested} bytes in {space} memory")]
    Allocation { requested: usize, space: MemorySpace },

    /// The device is compiled in but cannot run right now
    #[error("device {0} is not available")]
    DeviceUnavailable(DeviceId),

    /// No device in the preference list qualifies
    #[error("no available device among {requested:?}")]
    NoAvailableDevice { requested: Vec<DeviceId> },

    /// A kernel or algorithm failed while running on a device
    #[error("execution failed on {device}: {message}")]
    Execution { device: DeviceId, message: String },

    /// A copy between memory spaces could not be performed
    #[error("transfer of {bytes} bytes from {from} to {to} failed: destination too small")]
    Transfer {
        from: MemorySpace,
        to: MemorySpace,
        bytes: usize,
    },

    /// A device name did not parse
    #[error("unknown device `{0}`")]
    UnknownDevice(String),

    /// Unsupported operation
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl BackendError {
    pub fn execution(device: DeviceId, message: impl Into<String>) -> Self {
        Self::Execution {
            device,
            message: message.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}
