//! Hardware provider contract
//!
//! A backend exposes the imperative command entry points of one BLE role and
//! publishes the matching callbacks on its [`ActionBus`]. Commands return
//! immediately; their outcome arrives later as an event.
//!
//! Every command has a default body that panics with the command's name, so a
//! test double only implements what its test exercises and fails loudly on
//! anything else.

use uuid::Uuid;

use crate::bus::ActionBus;
use crate::error::unimplemented_endpoint;
use crate::events::{CentralManagerEvent, PeripheralEvent, PeripheralManagerEvent};
use crate::model::{
    AdvertisementData, AttRequest, AttResponseCode, Authorization, Central, Characteristic,
    ConnectionEventMatchingOptions, ConnectionLatency, ConnectionOptions, Descriptor,
    GattService, ManagerState, PeripheralState, Psm, ScanOptions, Service, WriteType,
};
use crate::peripheral::Peripheral;

// ----------------------------------------------------------------------------
// Central Role
// ----------------------------------------------------------------------------

/// Commands of a central manager
pub trait CentralManagerBackend: Send + Sync {
    /// Bus the manager's callbacks are published on
    fn bus(&self) -> &ActionBus<CentralManagerEvent>;

    fn state(&self) -> ManagerState {
        unimplemented_endpoint("state")
    }

    fn authorization(&self) -> Authorization {
        unimplemented_endpoint("authorization")
    }

    fn is_scanning(&self) -> bool {
        unimplemented_endpoint("is_scanning")
    }

    fn retrieve_peripherals(&self, _ids: &[Uuid]) -> Vec<Peripheral> {
        unimplemented_endpoint("retrieve_peripherals")
    }

    fn retrieve_connected_peripherals(&self, _services: &[Uuid]) -> Vec<Peripheral> {
        unimplemented_endpoint("retrieve_connected_peripherals")
    }

    fn scan_for_peripherals(&self, _services: Option<&[Uuid]>, _options: &ScanOptions) {
        unimplemented_endpoint("scan_for_peripherals")
    }

    fn stop_scan(&self) {
        unimplemented_endpoint("stop_scan")
    }

    fn connect(&self, _peripheral: &Peripheral, _options: &ConnectionOptions) {
        unimplemented_endpoint("connect")
    }

    fn cancel_peripheral_connection(&self, _peripheral: &Peripheral) {
        unimplemented_endpoint("cancel_peripheral_connection")
    }

    fn register_for_connection_events(&self, _options: Option<ConnectionEventMatchingOptions>) {
        unimplemented_endpoint("register_for_connection_events")
    }
}

// ----------------------------------------------------------------------------
// Remote Peripheral
// ----------------------------------------------------------------------------

/// Commands of a remote peripheral
pub trait PeripheralBackend: Send + Sync {
    fn identifier(&self) -> Uuid;

    /// Bus the peripheral's callbacks are published on
    fn bus(&self) -> &ActionBus<PeripheralEvent>;

    fn name(&self) -> Option<String> {
        unimplemented_endpoint("name")
    }

    fn state(&self) -> PeripheralState {
        unimplemented_endpoint("state")
    }

    /// Services discovered so far, `None` before any discovery
    fn services(&self) -> Option<Vec<Service>> {
        unimplemented_endpoint("services")
    }

    fn can_send_write_without_response(&self) -> bool {
        unimplemented_endpoint("can_send_write_without_response")
    }

    fn maximum_write_value_length(&self, _write_type: WriteType) -> usize {
        unimplemented_endpoint("maximum_write_value_length")
    }

    fn read_rssi(&self) {
        unimplemented_endpoint("read_rssi")
    }

    fn discover_services(&self, _ids: Option<&[Uuid]>) {
        unimplemented_endpoint("discover_services")
    }

    fn discover_included_services(&self, _ids: Option<&[Uuid]>, _service: &Service) {
        unimplemented_endpoint("discover_included_services")
    }

    fn discover_characteristics(&self, _ids: Option<&[Uuid]>, _service: &Service) {
        unimplemented_endpoint("discover_characteristics")
    }

    fn discover_descriptors(&self, _characteristic: &Characteristic) {
        unimplemented_endpoint("discover_descriptors")
    }

    fn read_value(&self, _characteristic: &Characteristic) {
        unimplemented_endpoint("read_value")
    }

    fn write_value(&self, _value: &[u8], _characteristic: &Characteristic, _write_type: WriteType) {
        unimplemented_endpoint("write_value")
    }

    fn set_notify_value(&self, _enabled: bool, _characteristic: &Characteristic) {
        unimplemented_endpoint("set_notify_value")
    }

    fn read_descriptor_value(&self, _descriptor: &Descriptor) {
        unimplemented_endpoint("read_descriptor_value")
    }

    fn write_descriptor_value(&self, _value: &[u8], _descriptor: &Descriptor) {
        unimplemented_endpoint("write_descriptor_value")
    }

    fn open_l2cap_channel(&self, _psm: Psm) {
        unimplemented_endpoint("open_l2cap_channel")
    }
}

// ----------------------------------------------------------------------------
// GATT Server Role
// ----------------------------------------------------------------------------

/// Commands of the local GATT server
pub trait PeripheralManagerBackend: Send + Sync {
    /// Bus the server's callbacks are published on
    fn bus(&self) -> &ActionBus<PeripheralManagerEvent>;

    fn state(&self) -> ManagerState {
        unimplemented_endpoint("state")
    }

    fn authorization(&self) -> Authorization {
        unimplemented_endpoint("authorization")
    }

    fn is_advertising(&self) -> bool {
        unimplemented_endpoint("is_advertising")
    }

    fn start_advertising(&self, _data: Option<AdvertisementData>) {
        unimplemented_endpoint("start_advertising")
    }

    fn stop_advertising(&self) {
        unimplemented_endpoint("stop_advertising")
    }

    fn set_desired_connection_latency(&self, _latency: ConnectionLatency, _central: &Central) {
        unimplemented_endpoint("set_desired_connection_latency")
    }

    fn add_service(&self, _service: &GattService) {
        unimplemented_endpoint("add_service")
    }

    fn remove_service(&self, _service: &Service) {
        unimplemented_endpoint("remove_service")
    }

    fn remove_all_services(&self) {
        unimplemented_endpoint("remove_all_services")
    }

    fn respond(&self, _request: &AttRequest, _result: AttResponseCode) {
        unimplemented_endpoint("respond")
    }

    /// Queue a value for subscribed centrals; `false` means the outbound
    /// queue is full and the caller should wait for a ready signal
    fn update_value(
        &self,
        _value: &[u8],
        _characteristic: &Characteristic,
        _centrals: Option<&[Central]>,
    ) -> bool {
        unimplemented_endpoint("update_value")
    }

    fn publish_l2cap_channel(&self, _encryption_required: bool) {
        unimplemented_endpoint("publish_l2cap_channel")
    }

    fn unpublish_l2cap_channel(&self, _psm: Psm) {
        unimplemented_endpoint("unpublish_l2cap_channel")
    }
}
