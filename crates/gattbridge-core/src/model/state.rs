//! Manager and connection states

use serde::{Deserialize, Serialize};

/// Power state of a central or peripheral manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ManagerState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

/// Whether the app may use Bluetooth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Authorization {
    #[default]
    NotDetermined,
    Restricted,
    Denied,
    AllowedAlways,
}

/// Connection lifecycle of a peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PeripheralState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl PeripheralState {
    pub fn is_connected(&self) -> bool {
        matches!(self, PeripheralState::Connected)
    }
}
