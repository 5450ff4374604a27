//! ATT requests received by the local GATT server

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::gatt::Characteristic;
use super::peer::Central;

// ----------------------------------------------------------------------------
// Response Codes
// ----------------------------------------------------------------------------

/// Result code sent back for an ATT request
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttResponseCode {
    #[error("Success")]
    Success,
    #[error("Invalid handle")]
    InvalidHandle,
    #[error("Read not permitted")]
    ReadNotPermitted,
    #[error("Write not permitted")]
    WriteNotPermitted,
    #[error("Invalid PDU")]
    InvalidPdu,
    #[error("Insufficient authentication")]
    InsufficientAuthentication,
    #[error("Request not supported")]
    RequestNotSupported,
    #[error("Invalid offset")]
    InvalidOffset,
    #[error("Insufficient authorization")]
    InsufficientAuthorization,
    #[error("Prepare queue full")]
    PrepareQueueFull,
    #[error("Attribute not found")]
    AttributeNotFound,
    #[error("Attribute not long")]
    AttributeNotLong,
    #[error("Insufficient encryption key size")]
    InsufficientEncryptionKeySize,
    #[error("Invalid attribute value length")]
    InvalidAttributeValueLength,
    #[error("Unlikely error")]
    UnlikelyError,
    #[error("Insufficient encryption")]
    InsufficientEncryption,
    #[error("Unsupported group type")]
    UnsupportedGroupType,
    #[error("Insufficient resources")]
    InsufficientResources,
}

impl AttResponseCode {
    pub fn is_success(self) -> bool {
        self == AttResponseCode::Success
    }
}

// ----------------------------------------------------------------------------
// Requests
// ----------------------------------------------------------------------------

/// A read or write a central issued against one of our characteristics.
///
/// Responses are correlated back by `id`; two requests with identical
/// contents are still distinct requests.
#[derive(Debug, Clone)]
pub struct AttRequest {
    pub id: Uuid,
    pub central: Central,
    pub characteristic: Characteristic,
    pub offset: usize,
    /// Written bytes for writes, response payload for reads
    pub value: Option<Vec<u8>>,
}

impl AttRequest {
    pub fn new(
        central: Central,
        characteristic: Characteristic,
        offset: usize,
        value: Option<Vec<u8>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            central,
            characteristic,
            offset,
            value,
        }
    }

    /// Fill in the payload a read request responds with
    pub fn respond_with(mut self, value: Vec<u8>) -> Self {
        self.value = Some(value);
        self
    }
}

impl PartialEq for AttRequest {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AttRequest {}

impl Hash for AttRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
