//! Options passed along with central and peripheral commands

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scan behaviour
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Report every advertisement instead of only the first per peripheral
    pub allow_duplicates: bool,
    pub solicited_service_uuids: Vec<Uuid>,
}

impl ScanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allow_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }

    pub fn with_solicited_service_uuids(mut self, uuids: Vec<Uuid>) -> Self {
        self.solicited_service_uuids = uuids;
        self
    }
}

/// Connection behaviour
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    pub notify_on_connection: bool,
    pub notify_on_disconnection: bool,
    pub notify_on_notification: bool,
    pub start_delay: Option<Duration>,
}

/// Filter for connection events delivered while the app is not connected itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEventMatchingOptions {
    pub service_uuids: Option<Vec<Uuid>>,
    pub peripheral_ids: Option<Vec<Uuid>>,
}

impl ConnectionEventMatchingOptions {
    pub fn services(uuids: Vec<Uuid>) -> Self {
        Self {
            service_uuids: Some(uuids),
            peripheral_ids: None,
        }
    }

    pub fn peripherals(ids: Vec<Uuid>) -> Self {
        Self {
            service_uuids: None,
            peripheral_ids: Some(ids),
        }
    }

    /// Overlay `other` on top of these options; keys it sets win
    pub fn merge(&mut self, other: ConnectionEventMatchingOptions) {
        if other.service_uuids.is_some() {
            self.service_uuids = other.service_uuids;
        }
        if other.peripheral_ids.is_some() {
            self.peripheral_ids = other.peripheral_ids;
        }
    }
}

/// Kind of connection event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionEvent {
    PeerConnected,
    PeerDisconnected,
}

/// Whether a characteristic write expects a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

/// Desired latency for a connected central
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionLatency {
    Low,
    Medium,
    High,
}
