//! Central manager facade
//!
//! Scanning, connecting and connection monitoring on top of a
//! [`CentralManagerBackend`].

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::CentralManagerBackend;
use crate::bus::{ActionBus, EventReceiver};
use crate::correlator::{EventStream, Request, SharedStream, Step};
use crate::error::BleError;
use crate::events::{CentralManagerEvent, PeripheralDiscovery};
use crate::model::{
    Authorization, ConnectionEvent, ConnectionEventMatchingOptions, ConnectionOptions,
    ManagerState, ScanOptions,
};
use crate::peripheral::Peripheral;

/// The local central role
#[derive(Clone)]
pub struct CentralManager {
    backend: Arc<dyn CentralManagerBackend>,
}

impl CentralManager {
    pub fn new(backend: Arc<dyn CentralManagerBackend>) -> Self {
        Self { backend }
    }

    pub fn state(&self) -> ManagerState {
        self.backend.state()
    }

    pub fn authorization(&self) -> Authorization {
        self.backend.authorization()
    }

    pub fn is_scanning(&self) -> bool {
        self.backend.is_scanning()
    }

    /// Raw callback stream
    pub fn events(&self) -> EventReceiver<CentralManagerEvent> {
        self.bus().subscribe()
    }

    fn bus(&self) -> &ActionBus<CentralManagerEvent> {
        self.backend.bus()
    }

    pub fn state_updates(&self) -> EventStream<ManagerState> {
        EventStream::listen(self.bus(), |event| match event {
            CentralManagerEvent::StateUpdated(state) => Step::Yield(state),
            _ => Step::Skip,
        })
    }

    pub fn retrieve_peripherals(&self, ids: &[Uuid]) -> Vec<Peripheral> {
        self.backend.retrieve_peripherals(ids)
    }

    pub fn retrieve_connected_peripherals(&self, services: &[Uuid]) -> Vec<Peripheral> {
        self.backend.retrieve_connected_peripherals(services)
    }

    // ------------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------------

    /// Advertisements seen while scanning.
    ///
    /// The scan starts when the first subscriber attaches and stops once the
    /// last one is dropped. Subscribers joining a running scan first receive
    /// the most recent discovery.
    pub fn scan_for_peripherals(
        &self,
        services: Option<Vec<Uuid>>,
        options: ScanOptions,
    ) -> SharedStream<PeripheralDiscovery> {
        let start = Arc::clone(&self.backend);
        let stop = Arc::clone(&self.backend);
        SharedStream::correlate(
            self.bus(),
            move || {
                info!(services = ?services, "Starting scan");
                start.scan_for_peripherals(services.as_deref(), &options)
            },
            move || {
                info!("Stopping scan");
                stop.stop_scan()
            },
            |event| match event {
                CentralManagerEvent::PeripheralDiscovered(discovery) => Some(discovery),
                _ => None,
            },
        )
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    /// Connect to a peripheral.
    ///
    /// Resolves with the connected peripheral or the reported failure.
    /// Abandoning the request before it resolves cancels the attempt.
    pub fn connect(&self, peripheral: &Peripheral, options: ConnectionOptions) -> Request<Peripheral> {
        let id = peripheral.id();
        let issue = Arc::clone(&self.backend);
        let cancel = Arc::clone(&self.backend);
        let target = peripheral.clone();
        let abandoned = peripheral.clone();

        Request::correlate(
            self.bus(),
            move || {
                debug!(peripheral = %target.id(), "Connecting");
                issue.connect(&target, &options)
            },
            move |event| match event {
                CentralManagerEvent::Connected(peripheral) if peripheral.id() == id => {
                    Some(Ok(peripheral))
                }
                CentralManagerEvent::FailedToConnect { peripheral, error } if peripheral.id() == id => {
                    Some(Err(error.unwrap_or(BleError::UnknownConnectionFailure)))
                }
                _ => None,
            },
        )
        .on_cancel(move || cancel.cancel_peripheral_connection(&abandoned))
    }

    pub fn cancel_peripheral_connection(&self, peripheral: &Peripheral) {
        self.backend.cancel_peripheral_connection(peripheral)
    }

    pub fn register_for_connection_events(&self, options: Option<ConnectionEventMatchingOptions>) {
        self.backend.register_for_connection_events(options)
    }

    /// `true` on every connect and `false` on every disconnect of one
    /// peripheral, regardless of disconnect errors
    pub fn monitor_connection(&self, peripheral: &Peripheral) -> EventStream<bool> {
        let id = peripheral.id();
        EventStream::listen(self.bus(), move |event| match event {
            CentralManagerEvent::Connected(peripheral) if peripheral.id() == id => Step::Yield(true),
            CentralManagerEvent::Disconnected { peripheral, .. } if peripheral.id() == id => {
                Step::Yield(false)
            }
            _ => Step::Skip,
        })
    }

    /// Connection events matching the registered filter
    pub fn connection_events(&self) -> EventStream<(ConnectionEvent, Peripheral)> {
        EventStream::listen(self.bus(), |event| match event {
            CentralManagerEvent::ConnectionEventOccurred { event, peripheral } => {
                Step::Yield((event, peripheral))
            }
            _ => Step::Skip,
        })
    }
}

impl fmt::Debug for CentralManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentralManager")
            .field("bus", self.bus())
            .finish_non_exhaustive()
    }
}
