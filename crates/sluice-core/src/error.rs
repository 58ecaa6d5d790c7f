//! Error types for sluice-core operations

use sluice_backends::{BackendError, DeviceId, MemorySpace};

/// Result type for sluice-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to control code
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A memory manager could not provide storage
    #[error("Allocation failed: {requested} bytes in {space} memory")]
    Allocation { requested: usize, space: MemorySpace },

    /// The storage strategy cannot perform the request (e.g. writing a
    /// computed array)
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// No device in the preference list can run
    #[error("No available device among {requested:?}")]
    NoAvailableDevice { requested: Vec<DeviceId> },

    /// A specific device was requested but cannot run
    #[error("Device {0} is unavailable")]
    DeviceUnavailable(DeviceId),

    /// Arguments failed host-side validation; no device work was started
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// A kernel or algorithm failed on the device
    #[error("Execution error on {device}: {message}")]
    Execution { device: DeviceId, message: String },

    /// Type mismatch
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Buffer size mismatch
    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Index outside an array
    #[error("Index {index} out of bounds for length {len}")]
    OutOfBounds { index: usize, len: usize },

    /// Runtime configuration could not be parsed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::Dispatch(msg.into())
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Allocation { requested, space } => Error::Allocation { requested, space },
            BackendError::DeviceUnavailable(id) => Error::DeviceUnavailable(id),
            BackendError::NoAvailableDevice { requested } => Error::NoAvailableDevice { requested },
            BackendError::Execution { device, message } => Error::Execution { device, message },
            BackendError::Transfer { from, to, bytes } => Error::UnsupportedOperation(format!(
                "transfer of {bytes} bytes from {from} to {to} does not fit its destination"
            )),
            BackendError::UnknownDevice(name) => Error::InvalidConfig(format!("unknown device `{name}`")),
            BackendError::Unsupported(msg) => Error::UnsupportedOperation(msg),
        }
    }
}
