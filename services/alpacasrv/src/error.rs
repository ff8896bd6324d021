//! Error handling for the Alpaca service
//!
//! Every device failure is expressed as an [`AlpacaError`]. The dispatcher
//! turns it into the (ErrorNumber, ErrorMessage) pair carried by the
//! transaction envelope, and into the HTTP status of the response.

use axum::http::StatusCode;
use thiserror::Error;

/// Alpaca ErrorNumber values
///
/// 0x400..=0x4FF are the protocol-reserved codes, 0x500.. is the
/// driver-specific range.
pub mod codes {
    pub const SUCCESS: i32 = 0;
    pub const NOT_IMPLEMENTED: i32 = 0x400;
    pub const INVALID_VALUE: i32 = 0x401;
    pub const VALUE_NOT_SET: i32 = 0x402;
    pub const NOT_CONNECTED: i32 = 0x407;
    pub const INVALID_OPERATION: i32 = 0x40B;
    pub const PROPERTY_NOT_IMPLEMENTED: i32 = 0x40C;
    pub const UNSPECIFIED: i32 = 0x4FF;
    pub const DEVICE_NOT_FOUND: i32 = 0x500;
    pub const DEVICE_TIMEOUT: i32 = 0x501;
}

/// Alpaca device error taxonomy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlpacaError {
    /// Property or action accessed while the device is disconnected
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Parameter outside its declared domain, or malformed
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Property read before a value was ever written (e.g. target coordinates)
    #[error("Value not set: {0}")]
    ValueNotSet(String),

    /// Member known for the device type but outside its capability set
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Member name unrecognized for the device type, or read-only on write
    #[error("Property not implemented: {0}")]
    PropertyNotImplemented(String),

    /// Operation conflicts with the current device state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Device type/number not present in the registry
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Underlying hardware did not respond in time
    #[error("Device timeout: {0}")]
    DeviceTimeout(String),

    /// Unexpected fault
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for the Alpaca service
pub type Result<T> = std::result::Result<T, AlpacaError>;

impl AlpacaError {
    pub fn not_connected(device: impl std::fmt::Display) -> Self {
        AlpacaError::NotConnected(format!("{device} is not connected"))
    }

    pub fn invalid_value(msg: impl Into<String>) -> Self {
        AlpacaError::InvalidValue(msg.into())
    }

    pub fn value_not_set(msg: impl Into<String>) -> Self {
        AlpacaError::ValueNotSet(msg.into())
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        AlpacaError::NotImplemented(msg.into())
    }

    pub fn property_not_implemented(msg: impl Into<String>) -> Self {
        AlpacaError::PropertyNotImplemented(msg.into())
    }

    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        AlpacaError::InvalidOperation(msg.into())
    }

    pub fn device_not_found(msg: impl Into<String>) -> Self {
        AlpacaError::DeviceNotFound(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        AlpacaError::DeviceTimeout(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AlpacaError::Internal(msg.into())
    }

    /// Convenience for range checks on numeric parameters
    pub fn out_of_range(name: &str, value: f64, min: f64, max: f64) -> Self {
        AlpacaError::InvalidValue(format!(
            "{name} value {value} is outside the range {min} to {max}"
        ))
    }

    /// Alpaca ErrorNumber for this error
    pub fn error_number(&self) -> i32 {
        match self {
            Self::NotImplemented(_) => codes::NOT_IMPLEMENTED,
            Self::InvalidValue(_) => codes::INVALID_VALUE,
            Self::ValueNotSet(_) => codes::VALUE_NOT_SET,
            Self::NotConnected(_) => codes::NOT_CONNECTED,
            Self::InvalidOperation(_) => codes::INVALID_OPERATION,
            Self::PropertyNotImplemented(_) => codes::PROPERTY_NOT_IMPLEMENTED,
            Self::Internal(_) => codes::UNSPECIFIED,
            Self::DeviceNotFound(_) => codes::DEVICE_NOT_FOUND,
            Self::DeviceTimeout(_) => codes::DEVICE_TIMEOUT,
        }
    }

    /// HTTP status mirroring the error number
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidValue(_) => StatusCode::BAD_REQUEST,
            Self::DeviceNotFound(_) | Self::PropertyNotImplemented(_) => StatusCode::NOT_FOUND,
            Self::NotConnected(_) | Self::InvalidOperation(_) | Self::ValueNotSet(_) => {
                StatusCode::CONFLICT
            },
            Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Self::DeviceTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable identifier used in log lines
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotConnected(_) => "ALPACA_NOT_CONNECTED",
            Self::InvalidValue(_) => "ALPACA_INVALID_VALUE",
            Self::ValueNotSet(_) => "ALPACA_VALUE_NOT_SET",
            Self::NotImplemented(_) => "ALPACA_NOT_IMPLEMENTED",
            Self::PropertyNotImplemented(_) => "ALPACA_PROPERTY_NOT_IMPLEMENTED",
            Self::InvalidOperation(_) => "ALPACA_INVALID_OPERATION",
            Self::DeviceNotFound(_) => "ALPACA_DEVICE_NOT_FOUND",
            Self::DeviceTimeout(_) => "ALPACA_DEVICE_TIMEOUT",
            Self::Internal(_) => "ALPACA_INTERNAL_ERROR",
        }
    }

    /// Whether an operator should see this in the error log
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<serde_json::Error> for AlpacaError {
    fn from(err: serde_json::Error) -> Self {
        AlpacaError::Internal(format!("JSON: {err}"))
    }
}
