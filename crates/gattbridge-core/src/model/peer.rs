//! Remote peers seen by the local GATT server

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use uuid::Uuid;

/// Platform handle for a central connected to the local GATT server
pub trait NativePeer: Send + Sync + fmt::Debug {
    /// Largest value the central accepts in a single notification
    fn maximum_update_value_length(&self) -> usize;
}

/// Where a peer value came from
#[derive(Debug, Clone)]
pub enum PeerHandle {
    /// Backed by the platform Bluetooth stack
    Live(Arc<dyn NativePeer>),
    /// Constructed by a simulation
    Simulated { maximum_update_value_length: usize },
}

/// A remote central connected to us.
///
/// Equality and hashing only look at the identifier.
#[derive(Debug, Clone)]
pub struct Central {
    pub id: Uuid,
    pub handle: PeerHandle,
}

impl Central {
    pub fn live(id: Uuid, native: Arc<dyn NativePeer>) -> Self {
        Self {
            id,
            handle: PeerHandle::Live(native),
        }
    }

    pub fn simulated(id: Uuid, maximum_update_value_length: usize) -> Self {
        Self {
            id,
            handle: PeerHandle::Simulated {
                maximum_update_value_length,
            },
        }
    }

    pub fn maximum_update_value_length(&self) -> usize {
        match &self.handle {
            PeerHandle::Live(native) => native.maximum_update_value_length(),
            PeerHandle::Simulated {
                maximum_update_value_length,
            } => *maximum_update_value_length,
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self.handle, PeerHandle::Simulated { .. })
    }
}

impl PartialEq for Central {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Central {}

impl Hash for Central {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FixedMtu(usize);

    impl NativePeer for FixedMtu {
        fn maximum_update_value_length(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn test_maximum_length_reads_through_handle() {
        let id = Uuid::new_v4();
        let live = Central::live(id, Arc::new(FixedMtu(185)));
        let simulated = Central::simulated(id, 20);

        assert_eq!(live.maximum_update_value_length(), 185);
        assert_eq!(simulated.maximum_update_value_length(), 20);
        assert!(simulated.is_simulated());
        assert!(!live.is_simulated());
        // identity is id-based regardless of provenance
        assert_eq!(live, simulated);
    }
}
