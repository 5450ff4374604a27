//! GATT hierarchy: discovered handles and owned definitions

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Owner id used for handles that belong to the local GATT server
pub const LOCAL_PERIPHERAL: Uuid = Uuid::nil();

/// Declared capabilities of a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharacteristicProperty {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthenticatedSignedWrites,
    ExtendedProperties,
}

// ----------------------------------------------------------------------------
// Discovered Handles
// ----------------------------------------------------------------------------

/// A service discovered on (or published by) a peripheral
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    pub uuid: Uuid,
    /// Identifier of the peripheral the service lives on
    pub peripheral: Uuid,
    pub primary: bool,
}

impl Service {
    pub fn new(uuid: Uuid, peripheral: Uuid, primary: bool) -> Self {
        Self {
            uuid,
            peripheral,
            primary,
        }
    }

    /// Handle for a service hosted by the local GATT server
    pub fn local(uuid: Uuid, primary: bool) -> Self {
        Self::new(uuid, LOCAL_PERIPHERAL, primary)
    }
}

/// A characteristic inside a [`Service`].
///
/// Identity is the characteristic type plus its parents; the cached value
/// and the declared properties never take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub service: Uuid,
    pub peripheral: Uuid,
    pub properties: Vec<CharacteristicProperty>,
    pub value: Option<Vec<u8>>,
}

impl Characteristic {
    pub fn new(uuid: Uuid, service: &Service, properties: Vec<CharacteristicProperty>) -> Self {
        Self {
            uuid,
            service: service.uuid,
            peripheral: service.peripheral,
            properties,
            value: None,
        }
    }

    /// Handle for a characteristic hosted by the local GATT server
    pub fn local(uuid: Uuid, service: Uuid, properties: Vec<CharacteristicProperty>) -> Self {
        Self::new(uuid, &Service::local(service, true), properties)
    }

    pub fn with_value(mut self, value: Option<Vec<u8>>) -> Self {
        self.value = value;
        self
    }

    pub fn has_property(&self, property: CharacteristicProperty) -> bool {
        self.properties.contains(&property)
    }

    /// Whether this characteristic belongs to the given service
    pub fn is_in(&self, service: &Service) -> bool {
        self.service == service.uuid && self.peripheral == service.peripheral
    }

    fn identity(&self) -> (Uuid, Uuid, Uuid) {
        (self.uuid, self.service, self.peripheral)
    }
}

impl PartialEq for Characteristic {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Characteristic {}

impl Hash for Characteristic {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

/// A descriptor attached to a [`Characteristic`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub uuid: Uuid,
    pub characteristic: Uuid,
    pub service: Uuid,
    pub peripheral: Uuid,
    pub value: Option<Vec<u8>>,
}

impl Descriptor {
    pub fn new(uuid: Uuid, characteristic: &Characteristic) -> Self {
        Self {
            uuid,
            characteristic: characteristic.uuid,
            service: characteristic.service,
            peripheral: characteristic.peripheral,
            value: None,
        }
    }

    pub fn with_value(mut self, value: Option<Vec<u8>>) -> Self {
        self.value = value;
        self
    }

    /// Whether this descriptor belongs to the given characteristic
    pub fn is_on(&self, characteristic: &Characteristic) -> bool {
        self.characteristic == characteristic.uuid
            && self.service == characteristic.service
            && self.peripheral == characteristic.peripheral
    }

    fn identity(&self) -> (Uuid, Uuid, Uuid, Uuid) {
        (self.uuid, self.characteristic, self.service, self.peripheral)
    }
}

impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Descriptor {}

impl Hash for Descriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

// ----------------------------------------------------------------------------
// Definitions
// ----------------------------------------------------------------------------

/// Owned description of a service a peripheral exposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn new(uuid: Uuid, primary: bool, characteristics: Vec<GattCharacteristic>) -> Self {
        Self {
            uuid,
            primary,
            characteristics,
        }
    }

    /// Handle for this service on the given peripheral
    pub fn handle(&self, peripheral: Uuid) -> Service {
        Service::new(self.uuid, peripheral, self.primary)
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Owned description of a characteristic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: Vec<CharacteristicProperty>,
    pub value: Option<Vec<u8>>,
    pub descriptors: Vec<GattDescriptor>,
}

impl GattCharacteristic {
    pub fn new(
        uuid: Uuid,
        properties: Vec<CharacteristicProperty>,
        value: Option<Vec<u8>>,
        descriptors: Vec<GattDescriptor>,
    ) -> Self {
        Self {
            uuid,
            properties,
            value,
            descriptors,
        }
    }

    pub fn handle(&self, service: &Service) -> Characteristic {
        Characteristic::new(self.uuid, service, self.properties.clone())
            .with_value(self.value.clone())
    }
}

/// Owned description of a descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GattDescriptor {
    pub uuid: Uuid,
    pub value: Option<Vec<u8>>,
}

impl GattDescriptor {
    pub fn new(uuid: Uuid, value: Option<Vec<u8>>) -> Self {
        Self { uuid, value }
    }

    pub fn handle(&self, characteristic: &Characteristic) -> Descriptor {
        Descriptor::new(self.uuid, characteristic).with_value(self.value.clone())
    }
}
