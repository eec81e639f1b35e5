//! Error types for the thermo-gatt crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The radio adapter is not powered on.
    #[error("Bluetooth adapter is off")]
    AdapterOff,

    /// No matching advertisement was seen before the scan deadline.
    #[error("Scan timed out")]
    ScanTimeout,

    /// The platform refused or aborted a scan.
    #[error("Scan failed with code {code}")]
    ScanFailed {
        /// Platform status code.
        code: i32,
    },

    /// The platform could not establish the link.
    #[error("Connection failed with code {code}")]
    ConnectFailed {
        /// Platform status code.
        code: i32,
    },

    /// The link was not established before the connect deadline.
    #[error("Connection timed out")]
    ConnectTimeout,

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// A characteristic value was too short to decode.
    #[error("Malformed payload: expected at least {expected} bytes, got {actual}")]
    MalformedPayload {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes supplied.
        actual: usize,
    },

    /// A GATT request to the platform stack returned a failure status.
    #[error("Platform request failed with code {code}")]
    PlatformRequestFailed {
        /// Platform status code.
        code: i32,
    },

    /// An advertising payload does not fit the legacy size limit.
    #[error("Advertisement too large: {size} bytes (max {max})")]
    AdvertisementTooLarge {
        /// Encoded payload size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The device is not known to the registry or the platform.
    #[error("Device not found: {identifier}")]
    DeviceNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// The requested operation is not supported by this platform.
    #[error("Operation not supported: {operation}")]
    NotSupported {
        /// Description of the unsupported operation.
        operation: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a central session ended up in the error state.
///
/// This is the cloneable counterpart of [`Error`] carried by
/// [`SessionState::Error`](crate::central::SessionState::Error). Its display
/// strings are the human-readable reasons a UI shows.
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FailureReason {
    /// The radio adapter reported powered-off.
    #[error("adapter off")]
    AdapterOff,
    /// No matching device advertised before the scan deadline.
    #[error("scan timeout")]
    ScanTimeout,
    /// The scan could not be started or was aborted by the platform.
    #[error("scan failed ({0})")]
    ScanFailed(i32),
    /// The link could not be established.
    #[error("connect failed ({0})")]
    ConnectFailed(i32),
    /// The link was not established before the connect deadline.
    #[error("connect timeout")]
    ConnectTimeout,
    /// Discovery finished without the temperature characteristic.
    #[error("characteristic not found")]
    CharacteristicNotFound,
    /// The temperature value could not be decoded.
    #[error("malformed payload")]
    MalformedPayload,
    /// Any other GATT request failed.
    #[error("platform request failed ({0})")]
    PlatformRequestFailed(i32),
}

/// Status code used when a platform error carries no code of its own.
pub const UNKNOWN_STATUS_CODE: i32 = -1;

impl From<&Error> for FailureReason {
    fn from(error: &Error) -> Self {
        match error {
            Error::AdapterOff => Self::AdapterOff,
            Error::ScanTimeout => Self::ScanTimeout,
            Error::ScanFailed { code } => Self::ScanFailed(*code),
            Error::ConnectFailed { code } => Self::ConnectFailed(*code),
            Error::ConnectTimeout => Self::ConnectTimeout,
            Error::CharacteristicNotFound { .. } => Self::CharacteristicNotFound,
            Error::MalformedPayload { .. } => Self::MalformedPayload,
            Error::PlatformRequestFailed { code } => Self::PlatformRequestFailed(*code),
            Error::Bluetooth(_)
            | Error::AdvertisementTooLarge { .. }
            | Error::DeviceNotFound { .. }
            | Error::NotSupported { .. }
            | Error::Internal(_) => Self::PlatformRequestFailed(UNKNOWN_STATUS_CODE),
        }
    }
}
