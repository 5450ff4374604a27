//! Pluggable behaviour of simulated devices
//!
//! Simulated devices never decide on their own how a read, a write or an
//! authorization prompt turns out. They ask one of these handlers.

use async_trait::async_trait;
use gattbridge_core::{
    AttResponseCode, Authorization, BleError, Central, Characteristic, Descriptor, Result,
    WriteType,
};

// ----------------------------------------------------------------------------
// Peripheral Handler
// ----------------------------------------------------------------------------

/// Answers the ATT operations a central performs on a simulated peripheral.
///
/// Errors are reported to the central exactly as returned, so handlers
/// usually fail with [`BleError::Att`].
#[async_trait]
pub trait PeripheralHandler: Send + Sync {
    async fn read_value(&self, characteristic: &Characteristic) -> Result<Vec<u8>>;

    async fn write_value(
        &self,
        characteristic: &Characteristic,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<()>;

    async fn set_notify_value(&self, characteristic: &Characteristic, enabled: bool) -> Result<()>;

    async fn read_descriptor_value(&self, descriptor: &Descriptor) -> Result<Vec<u8>>;

    async fn write_descriptor_value(&self, descriptor: &Descriptor, value: &[u8]) -> Result<()>;
}

/// Accepts everything; reads return an empty value
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentHandler;

#[async_trait]
impl PeripheralHandler for SilentHandler {
    async fn read_value(&self, _characteristic: &Characteristic) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn write_value(
        &self,
        _characteristic: &Characteristic,
        _value: &[u8],
        _write_type: WriteType,
    ) -> Result<()> {
        Ok(())
    }

    async fn set_notify_value(&self, _characteristic: &Characteristic, _enabled: bool) -> Result<()> {
        Ok(())
    }

    async fn read_descriptor_value(&self, _descriptor: &Descriptor) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn write_descriptor_value(&self, _descriptor: &Descriptor, _value: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Refuses everything with "not permitted" ATT errors
#[derive(Debug, Clone, Copy, Default)]
pub struct ThrowingHandler;

#[async_trait]
impl PeripheralHandler for ThrowingHandler {
    async fn read_value(&self, _characteristic: &Characteristic) -> Result<Vec<u8>> {
        Err(BleError::Att(AttResponseCode::ReadNotPermitted))
    }

    async fn write_value(
        &self,
        _characteristic: &Characteristic,
        _value: &[u8],
        _write_type: WriteType,
    ) -> Result<()> {
        Err(BleError::Att(AttResponseCode::WriteNotPermitted))
    }

    async fn set_notify_value(&self, _characteristic: &Characteristic, _enabled: bool) -> Result<()> {
        Err(BleError::Att(AttResponseCode::WriteNotPermitted))
    }

    async fn read_descriptor_value(&self, _descriptor: &Descriptor) -> Result<Vec<u8>> {
        Err(BleError::Att(AttResponseCode::ReadNotPermitted))
    }

    async fn write_descriptor_value(&self, _descriptor: &Descriptor, _value: &[u8]) -> Result<()> {
        Err(BleError::Att(AttResponseCode::WriteNotPermitted))
    }
}

// ----------------------------------------------------------------------------
// Central Authorization
// ----------------------------------------------------------------------------

/// Stands in for the system prompt asking the user to allow Bluetooth
#[async_trait]
pub trait CentralAuthorizer: Send + Sync {
    /// Ask for authorization while it is still undetermined
    async fn request_authorization(&self) -> Authorization;

    /// Called when a scan was refused for lack of authorization
    fn not_authorized(&self) {}
}

/// Grants every authorization request
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl CentralAuthorizer for AllowAll {
    async fn request_authorization(&self) -> Authorization {
        Authorization::AllowedAlways
    }
}

// ----------------------------------------------------------------------------
// Update Handler
// ----------------------------------------------------------------------------

/// Decides whether a simulated GATT server accepts an outbound update.
///
/// Returning `false` simulates a full transmit queue.
pub trait UpdateValueHandler: Send + Sync {
    fn update_value(
        &self,
        value: &[u8],
        characteristic: &Characteristic,
        centrals: Option<&[Central]>,
    ) -> bool;
}

impl<F> UpdateValueHandler for F
where
    F: Fn(&[u8], &Characteristic, Option<&[Central]>) -> bool + Send + Sync,
{
    fn update_value(
        &self,
        value: &[u8],
        characteristic: &Characteristic,
        centrals: Option<&[Central]>,
    ) -> bool {
        self(value, characteristic, centrals)
    }
}
