//! Error types shared by every BLE role

use thiserror::Error;
use uuid::Uuid;

use crate::model::AttResponseCode;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors surfaced by correlated BLE operations.
///
/// Results are cached and replayed to every consumer of a shared request, so
/// the error is `Clone` and carries no boxed trait objects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BleError {
    #[error("Unknown device")]
    UnknownDevice,

    #[error("Connection failed")]
    ConnectionFailed,

    #[error("Connection failed for an unknown reason")]
    UnknownConnectionFailure,

    #[error("Peripheral disconnected")]
    PeripheralDisconnected,

    #[error("Request timed out")]
    RequestTimeout,

    #[error("Not authorized to use Bluetooth")]
    NotAuthorized,

    #[error("Characteristic {characteristic} does not permit writes without response")]
    WriteNotPermitted { characteristic: Uuid },

    #[error("Service not found: {0}")]
    ServiceNotFound(Uuid),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("Descriptor {descriptor} not found on characteristic {characteristic}")]
    DescriptorNotFound { descriptor: Uuid, characteristic: Uuid },

    #[error("Failed to update characteristic {0}")]
    FailedToUpdateCharacteristic(Uuid),

    #[error("ATT error: {0}")]
    Att(#[from] AttResponseCode),

    #[error("Event bus closed before a response arrived")]
    EventBusClosed,

    #[error("Platform error: {0}")]
    Platform(String),
}

impl BleError {
    /// Whether this error ends a connection attempt rather than a single request
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            BleError::UnknownDevice
                | BleError::ConnectionFailed
                | BleError::UnknownConnectionFailure
                | BleError::PeripheralDisconnected
        )
    }
}

/// Result type alias for BLE operations
pub type Result<T> = std::result::Result<T, BleError>;

/// Turn a callback's value and optional error into a result
pub(crate) fn settle<T>(value: T, error: Option<BleError>) -> Result<T> {
    error.map_or(Ok(value), Err)
}

// ----------------------------------------------------------------------------
// Programming Errors
// ----------------------------------------------------------------------------

/// Abort on a backend endpoint that has no implementation.
///
/// Test doubles override only the endpoints a test exercises; reaching any
/// other endpoint is a bug in the test, so it must fail loudly.
#[track_caller]
pub fn unimplemented_endpoint(name: &str) -> ! {
    panic!("`{}` was called but is not implemented by this backend", name)
}
