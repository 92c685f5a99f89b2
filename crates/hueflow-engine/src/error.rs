/*!
 * Error types for the HueFlow engine crate.
 */
use thiserror::Error;

/// Error type for HueFlow engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// Required settings are missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Device error
    #[error("Device error: {0}")]
    Device(#[from] hueflow_devices::DeviceError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] hueflow_core::error::Error),

    /// The controller was used out of order
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Pairing did not produce a token
    #[error("Pairing error: {0}")]
    Pairing(String),
}

/// Result type for HueFlow engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new configuration error
    pub fn configuration<S: AsRef<str>>(msg: S) -> Self {
        Error::Configuration(msg.as_ref().to_string())
    }

    /// Create a new runtime error
    pub fn runtime<S: AsRef<str>>(msg: S) -> Self {
        Error::Runtime(msg.as_ref().to_string())
    }

    /// Create a new pairing error
    pub fn pairing<S: AsRef<str>>(msg: S) -> Self {
        Error::Pairing(msg.as_ref().to_string())
    }
}
