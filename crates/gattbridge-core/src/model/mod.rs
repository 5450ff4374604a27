//! Data model shared by the central, peripheral and GATT server roles

pub mod advertisement;
pub mod att;
pub mod channel;
pub mod gatt;
pub mod options;
pub mod peer;
pub mod state;

pub use advertisement::AdvertisementData;
pub use att::{AttRequest, AttResponseCode};
pub use channel::{ChannelIo, L2capChannel, Psm};
pub use gatt::{
    Characteristic, CharacteristicProperty, Descriptor, GattCharacteristic, GattDescriptor,
    GattService, Service, LOCAL_PERIPHERAL,
};
pub use options::{
    ConnectionEvent, ConnectionEventMatchingOptions, ConnectionLatency, ConnectionOptions,
    ScanOptions, WriteType,
};
pub use peer::{Central, NativePeer, PeerHandle};
pub use state::{Authorization, ManagerState, PeripheralState};
