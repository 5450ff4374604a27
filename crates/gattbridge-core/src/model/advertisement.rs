//! Advertisement payloads

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Data carried by one advertisement packet.
///
/// Built once with the `with_*` methods and read through accessors; there is
/// no way to mutate a payload after it has been handed out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvertisementData {
    local_name: Option<String>,
    tx_power_level: Option<i16>,
    service_uuids: Vec<Uuid>,
    service_data: HashMap<Uuid, Vec<u8>>,
    manufacturer_data: Option<Vec<u8>>,
    overflow_service_uuids: Vec<Uuid>,
    is_connectable: Option<bool>,
    solicited_service_uuids: Vec<Uuid>,
}

impl AdvertisementData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    pub fn with_tx_power_level(mut self, level: i16) -> Self {
        self.tx_power_level = Some(level);
        self
    }

    pub fn with_service_uuids(mut self, uuids: Vec<Uuid>) -> Self {
        self.service_uuids = uuids;
        self
    }

    pub fn with_service_data(mut self, service: Uuid, data: Vec<u8>) -> Self {
        self.service_data.insert(service, data);
        self
    }

    pub fn with_manufacturer_data(mut self, data: Vec<u8>) -> Self {
        self.manufacturer_data = Some(data);
        self
    }

    pub fn with_overflow_service_uuids(mut self, uuids: Vec<Uuid>) -> Self {
        self.overflow_service_uuids = uuids;
        self
    }

    pub fn with_connectable(mut self, connectable: bool) -> Self {
        self.is_connectable = Some(connectable);
        self
    }

    pub fn with_solicited_service_uuids(mut self, uuids: Vec<Uuid>) -> Self {
        self.solicited_service_uuids = uuids;
        self
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    pub fn tx_power_level(&self) -> Option<i16> {
        self.tx_power_level
    }

    pub fn service_uuids(&self) -> &[Uuid] {
        &self.service_uuids
    }

    pub fn service_data(&self) -> &HashMap<Uuid, Vec<u8>> {
        &self.service_data
    }

    pub fn manufacturer_data(&self) -> Option<&[u8]> {
        self.manufacturer_data.as_deref()
    }

    pub fn overflow_service_uuids(&self) -> &[Uuid] {
        &self.overflow_service_uuids
    }

    pub fn is_connectable(&self) -> Option<bool> {
        self.is_connectable
    }

    pub fn solicited_service_uuids(&self) -> &[Uuid] {
        &self.solicited_service_uuids
    }
}
