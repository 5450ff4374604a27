//! Simulated remote centrals
//!
//! Tests hand [`SimulatedCentral::central`] to a
//! [`SimulatedPeripheralManager`](crate::peripheral_manager::SimulatedPeripheralManager)
//! to act as the device that subscribes, reads and writes.

use gattbridge_core::{AttRequest, Central, Characteristic};
use uuid::Uuid;

/// Default ATT payload limit of a simulated central
pub const DEFAULT_MAXIMUM_UPDATE_VALUE_LENGTH: usize = 512;

/// A remote central connected to the local GATT server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimulatedCentral {
    id: Uuid,
    maximum_update_value_length: usize,
}

impl SimulatedCentral {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            maximum_update_value_length: DEFAULT_MAXIMUM_UPDATE_VALUE_LENGTH,
        }
    }

    pub fn with_maximum_update_value_length(mut self, length: usize) -> Self {
        self.maximum_update_value_length = length;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Handle the GATT server sees for this central
    pub fn central(&self) -> Central {
        Central::simulated(self.id, self.maximum_update_value_length)
    }

    /// Read request for `characteristic` at `offset`
    pub fn read_request(&self, characteristic: &Characteristic, offset: usize) -> AttRequest {
        AttRequest::new(self.central(), characteristic.clone(), offset, None)
    }

    /// Write request carrying `value`
    pub fn write_request(&self, characteristic: &Characteristic, value: Vec<u8>) -> AttRequest {
        AttRequest::new(self.central(), characteristic.clone(), 0, Some(value))
    }
}

impl Default for SimulatedCentral {
    fn default() -> Self {
        Self::new()
    }
}
