//! Hardware callbacks, one enum per manager role
//!
//! Every callback carries an optional error the same way the platform
//! delegates do; correlated operations turn that error into a failed result.

use crate::error::BleError;
use crate::model::{
    AdvertisementData, AttRequest, Central, Characteristic, ConnectionEvent, Descriptor,
    L2capChannel, ManagerState, Psm, Service,
};
use crate::peripheral::Peripheral;

/// One advertisement seen while scanning
#[derive(Debug, Clone)]
pub struct PeripheralDiscovery {
    pub peripheral: Peripheral,
    pub advertisement_data: AdvertisementData,
    pub rssi: Option<f64>,
}

// ----------------------------------------------------------------------------
// Central Role
// ----------------------------------------------------------------------------

/// Callbacks from a central manager
#[derive(Debug, Clone)]
pub enum CentralManagerEvent {
    StateUpdated(ManagerState),
    PeripheralDiscovered(PeripheralDiscovery),
    Connected(Peripheral),
    FailedToConnect {
        peripheral: Peripheral,
        error: Option<BleError>,
    },
    Disconnected {
        peripheral: Peripheral,
        error: Option<BleError>,
    },
    ConnectionEventOccurred {
        event: ConnectionEvent,
        peripheral: Peripheral,
    },
}

// ----------------------------------------------------------------------------
// Remote Peripheral
// ----------------------------------------------------------------------------

/// Callbacks from a connected peripheral.
///
/// Discovery callbacks report the full set of children known for the parent
/// so far, not only the ones found by the latest call.
#[derive(Debug, Clone)]
pub enum PeripheralEvent {
    RssiRead {
        rssi: f64,
        error: Option<BleError>,
    },
    ServicesDiscovered {
        services: Vec<Service>,
        error: Option<BleError>,
    },
    IncludedServicesDiscovered {
        service: Service,
        included: Vec<Service>,
        error: Option<BleError>,
    },
    CharacteristicsDiscovered {
        service: Service,
        characteristics: Vec<Characteristic>,
        error: Option<BleError>,
    },
    DescriptorsDiscovered {
        characteristic: Characteristic,
        descriptors: Vec<Descriptor>,
        error: Option<BleError>,
    },
    /// A read completed or a notification arrived; the value is on the
    /// characteristic
    CharacteristicValueUpdated {
        characteristic: Characteristic,
        error: Option<BleError>,
    },
    CharacteristicWritten {
        characteristic: Characteristic,
        error: Option<BleError>,
    },
    NotificationStateUpdated {
        characteristic: Characteristic,
        is_notifying: bool,
        error: Option<BleError>,
    },
    DescriptorValueUpdated {
        descriptor: Descriptor,
        error: Option<BleError>,
    },
    DescriptorWritten {
        descriptor: Descriptor,
        error: Option<BleError>,
    },
    ChannelOpened {
        channel: Option<L2capChannel>,
        error: Option<BleError>,
    },
    ReadyToSendWriteWithoutResponse,
    NameUpdated(Option<String>),
    ServicesInvalidated(Vec<Service>),
}

// ----------------------------------------------------------------------------
// GATT Server Role
// ----------------------------------------------------------------------------

/// Callbacks from the local GATT server
#[derive(Debug, Clone)]
pub enum PeripheralManagerEvent {
    StateUpdated(ManagerState),
    AdvertisingStarted {
        error: Option<BleError>,
    },
    ServiceAdded {
        service: Service,
        error: Option<BleError>,
    },
    CentralSubscribed {
        central: Central,
        characteristic: Characteristic,
    },
    CentralUnsubscribed {
        central: Central,
        characteristic: Characteristic,
    },
    ReadRequestReceived(AttRequest),
    WriteRequestsReceived(Vec<AttRequest>),
    ReadyToUpdateSubscribers,
    ChannelPublished {
        psm: Psm,
        error: Option<BleError>,
    },
    ChannelUnpublished {
        psm: Psm,
        error: Option<BleError>,
    },
    ChannelOpened {
        channel: Option<L2capChannel>,
        error: Option<BleError>,
    },
}
