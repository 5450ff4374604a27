//! Simulated central manager
//!
//! Scans, connects and disconnects [`SimulatedPeripheral`]s. Every added
//! peripheral gets an advertising task that follows its current
//! [`Advertiser`](crate::advertiser::Advertiser) and reports packets while a
//! matching scan is running.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use gattbridge_core::sync::lock;
use gattbridge_core::{
    ActionBus, AdvertisementData, Authorization, BleError, CentralManagerBackend,
    CentralManagerEvent, ConnectionEvent, ConnectionEventMatchingOptions, ConnectionOptions,
    ManagerState, Peripheral, PeripheralBackend, PeripheralDiscovery, PeripheralState, ScanOptions,
};
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::SimulationConfig;
use crate::handler::{AllowAll, CentralAuthorizer};
use crate::peripheral::SimulatedPeripheral;

// ----------------------------------------------------------------------------
// State
// ----------------------------------------------------------------------------

/// Parameters of the running scan
#[derive(Debug, Clone)]
struct ScanFilter {
    services: Option<Vec<Uuid>>,
    options: ScanOptions,
}

struct CentralState {
    manager_state: ManagerState,
    authorization: Authorization,
    scan: Option<ScanFilter>,
    /// Bumped by every scan request and stop, so a scan waiting on the
    /// authorization prompt can tell it was stopped meanwhile
    scan_generation: u64,
    added: HashMap<Uuid, Arc<SimulatedPeripheral>>,
    /// Peripherals `retrieve_peripherals` and `connect` accept
    known: HashSet<Uuid>,
    discovered: HashSet<Uuid>,
    connected: HashSet<Uuid>,
    connection_events: Option<ConnectionEventMatchingOptions>,
    advertisers: Vec<AbortHandle>,
}

fn intersects(filter: &[Uuid], services: &[Uuid]) -> bool {
    filter.iter().any(|uuid| services.contains(uuid))
}

// ----------------------------------------------------------------------------
// Simulated Central Manager
// ----------------------------------------------------------------------------

/// A central manager whose radio is simulated
pub struct SimulatedCentralManager {
    config: SimulationConfig,
    bus: ActionBus<CentralManagerEvent>,
    authorizer: Mutex<Arc<dyn CentralAuthorizer>>,
    state: Mutex<CentralState>,
    this: Weak<Self>,
}

impl SimulatedCentralManager {
    pub fn new() -> Arc<Self> {
        Self::with_config(SimulationConfig::default())
    }

    pub fn with_config(config: SimulationConfig) -> Arc<Self> {
        let authorizer: Arc<dyn CentralAuthorizer> = Arc::new(AllowAll);
        Arc::new_cyclic(|this| Self {
            config,
            bus: ActionBus::new(),
            authorizer: Mutex::new(authorizer),
            state: Mutex::new(CentralState {
                manager_state: ManagerState::Unknown,
                authorization: Authorization::NotDetermined,
                scan: None,
                scan_generation: 0,
                added: HashMap::new(),
                known: HashSet::new(),
                discovered: HashSet::new(),
                connected: HashSet::new(),
                connection_events: None,
                advertisers: Vec::new(),
            }),
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn set_state(&self, new_state: ManagerState) {
        let old_state = std::mem::replace(&mut lock(&self.state).manager_state, new_state);
        debug!(?old_state, ?new_state, "Central manager state changed");
        self.bus.publish(CentralManagerEvent::StateUpdated(new_state));
    }

    pub fn set_authorization(&self, authorization: Authorization) {
        lock(&self.state).authorization = authorization;
    }

    /// Replace the prompt consulted while authorization is undetermined
    pub fn set_authorizer(&self, authorizer: Arc<dyn CentralAuthorizer>) {
        *lock(&self.authorizer) = authorizer;
    }

    /// Make a peripheral reachable over the simulated radio.
    ///
    /// A restorable peripheral can be retrieved and connected without being
    /// discovered first.
    pub fn add_peripheral(&self, peripheral: &Arc<SimulatedPeripheral>, restorable: bool) {
        let id = peripheral.id();
        let task = tokio::spawn(advertise(self.this.clone(), Arc::downgrade(peripheral)));

        let mut state = lock(&self.state);
        state.added.insert(id, Arc::clone(peripheral));
        if restorable {
            state.known.insert(id);
        }
        state.advertisers.push(task.abort_handle());
        debug!(peripheral = %id, restorable, "Peripheral added to simulation");
    }

    pub fn add_peripherals(&self, peripherals: &[Arc<SimulatedPeripheral>], restorable: bool) {
        for peripheral in peripherals {
            self.add_peripheral(peripheral, restorable);
        }
    }

    pub fn is_connected(&self, peripheral: Uuid) -> bool {
        lock(&self.state).connected.contains(&peripheral)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Report one advertising packet if the running scan wants it
    fn report_advertisement(
        &self,
        peripheral: &Arc<SimulatedPeripheral>,
        advertisement_data: AdvertisementData,
        rssi: f64,
    ) {
        let id = peripheral.id();
        {
            let mut state = lock(&self.state);
            let Some(scan) = state.scan.as_ref() else {
                return;
            };
            if !peripheral.is_discoverable() {
                return;
            }
            if !scan.options.allow_duplicates && state.discovered.contains(&id) {
                return;
            }
            if let Some(filter) = &scan.services {
                if !intersects(filter, &peripheral.declared_service_uuids()) {
                    return;
                }
            }
            state.discovered.insert(id);
            state.known.insert(id);
        }

        trace!(peripheral = %id, rssi, "Advertisement reported");
        self.bus
            .publish(CentralManagerEvent::PeripheralDiscovered(PeripheralDiscovery {
                peripheral: peripheral.facade(),
                advertisement_data,
                rssi: Some(rssi),
            }));
    }

    fn start_scan(&self, services: Option<Vec<Uuid>>, options: ScanOptions) {
        info!(?services, "Scan started");
        lock(&self.state).scan = Some(ScanFilter { services, options });
    }

    /// Fan a connection event out to the registered matcher
    fn process_connection_event(&self, event: ConnectionEvent, peripheral: &Arc<SimulatedPeripheral>) {
        let matched = {
            let state = lock(&self.state);
            state.connection_events.as_ref().map_or(false, |options| {
                let by_service = options
                    .service_uuids
                    .as_deref()
                    .map_or(false, |services| {
                        intersects(services, &peripheral.declared_service_uuids())
                    });
                let by_id = options
                    .peripheral_ids
                    .as_deref()
                    .map_or(false, |ids| ids.contains(&peripheral.id()));
                by_service || by_id
            })
        };
        if matched {
            self.bus.publish(CentralManagerEvent::ConnectionEventOccurred {
                event,
                peripheral: peripheral.facade(),
            });
        }
    }

    /// Run `action` after the connection delay unless the manager is gone
    fn after_connection_delay<F>(&self, action: F)
    where
        F: FnOnce(Arc<Self>) + Send + 'static,
    {
        let this = self.this.clone();
        let delay = self.config.connection_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = this.upgrade() {
                action(manager);
            }
        });
    }

    fn fail_connection(&self, peripheral: &Peripheral, error: BleError) {
        warn!(peripheral = %peripheral.id(), %error, "Connection attempt failed");
        let peripheral = peripheral.clone();
        self.after_connection_delay(move |manager| {
            manager.bus.publish(CentralManagerEvent::FailedToConnect {
                peripheral,
                error: Some(error),
            });
        });
    }
}

/// Advertising loop of one peripheral.
///
/// Restarts whenever the peripheral swaps its advertiser and ends once
/// either side has been dropped.
async fn advertise(manager: Weak<SimulatedCentralManager>, peripheral: Weak<SimulatedPeripheral>) {
    let Some(mut advertiser) = peripheral.upgrade().map(|p| p.watch_advertiser()) else {
        return;
    };
    loop {
        let current = advertiser.borrow_and_update().clone();
        let Some(current) = current else {
            if advertiser.changed().await.is_err() {
                return;
            }
            continue;
        };

        let mut event = 0u64;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(current.interval()) => {
                    event += 1;
                    let (Some(manager), Some(peripheral)) = (manager.upgrade(), peripheral.upgrade()) else {
                        return;
                    };
                    let (data, rssi) = current.emit(event);
                    manager.report_advertisement(&peripheral, data, rssi);
                }
                changed = advertiser.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
            }
        }
    }
}

impl Drop for SimulatedCentralManager {
    fn drop(&mut self) {
        for task in lock(&self.state).advertisers.drain(..) {
            task.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Backend
// ----------------------------------------------------------------------------

impl CentralManagerBackend for SimulatedCentralManager {
    fn bus(&self) -> &ActionBus<CentralManagerEvent> {
        &self.bus
    }

    fn state(&self) -> ManagerState {
        lock(&self.state).manager_state
    }

    fn authorization(&self) -> Authorization {
        lock(&self.state).authorization
    }

    fn is_scanning(&self) -> bool {
        lock(&self.state).scan.is_some()
    }

    fn retrieve_peripherals(&self, ids: &[Uuid]) -> Vec<Peripheral> {
        let state = lock(&self.state);
        ids.iter()
            .filter(|id| state.known.contains(*id))
            .filter_map(|id| state.added.get(id))
            .map(SimulatedPeripheral::facade)
            .collect()
    }

    // Matches against each peripheral's GATT database, discovered or not
    fn retrieve_connected_peripherals(&self, services: &[Uuid]) -> Vec<Peripheral> {
        let state = lock(&self.state);
        state
            .connected
            .iter()
            .filter_map(|id| state.added.get(id))
            .filter(|p| intersects(services, &p.declared_service_uuids()))
            .map(SimulatedPeripheral::facade)
            .collect()
    }

    fn scan_for_peripherals(&self, services: Option<&[Uuid]>, options: &ScanOptions) {
        let services = services.map(<[Uuid]>::to_vec);
        let authorization = lock(&self.state).authorization;
        let authorizer = Arc::clone(&lock(&self.authorizer));

        match authorization {
            Authorization::AllowedAlways => self.start_scan(services, options.clone()),
            Authorization::NotDetermined => {
                let this = self.this.clone();
                let options = options.clone();
                let generation = {
                    let mut state = lock(&self.state);
                    state.scan_generation += 1;
                    state.scan_generation
                };
                tokio::spawn(async move {
                    let answer = authorizer.request_authorization().await;
                    let Some(manager) = this.upgrade() else {
                        return;
                    };
                    manager.set_authorization(answer);
                    if answer == Authorization::AllowedAlways {
                        if lock(&manager.state).scan_generation != generation {
                            debug!("Scan stopped while waiting for authorization");
                            return;
                        }
                        manager.start_scan(services, options);
                    } else {
                        warn!(?answer, "Scan refused by authorization prompt");
                        authorizer.not_authorized();
                    }
                });
            }
            refused => {
                warn!(authorization = ?refused, "Scan refused");
                authorizer.not_authorized();
            }
        }
    }

    fn stop_scan(&self) {
        let mut state = lock(&self.state);
        state.scan_generation += 1;
        if state.scan.take().is_some() {
            info!("Scan stopped");
        }
    }

    fn connect(&self, peripheral: &Peripheral, _options: &ConnectionOptions) {
        let id = peripheral.id();
        let (target, already_connected) = {
            let state = lock(&self.state);
            let target = state
                .added
                .get(&id)
                .filter(|_| state.known.contains(&id))
                .cloned();
            (target, state.connected.contains(&id))
        };

        let Some(target) = target else {
            return self.fail_connection(peripheral, BleError::UnknownDevice);
        };
        if !target.is_connectable() {
            return self.fail_connection(peripheral, BleError::ConnectionFailed);
        }
        if already_connected {
            return;
        }

        debug!(peripheral = %id, "Connecting");
        target.set_state(PeripheralState::Connecting);
        self.after_connection_delay(move |manager| {
            if target.state() != PeripheralState::Connecting {
                return;
            }
            target.set_state(PeripheralState::Connected);
            lock(&manager.state).connected.insert(id);
            info!(peripheral = %id, "Connected");
            manager
                .bus
                .publish(CentralManagerEvent::Connected(target.facade()));
            manager.process_connection_event(ConnectionEvent::PeerConnected, &target);
        });
    }

    fn cancel_peripheral_connection(&self, peripheral: &Peripheral) {
        let id = peripheral.id();
        let Some(target) = lock(&self.state).added.get(&id).cloned() else {
            return;
        };
        if !matches!(
            target.state(),
            PeripheralState::Connected | PeripheralState::Connecting
        ) {
            return;
        }

        debug!(peripheral = %id, "Disconnecting");
        target.set_state(PeripheralState::Disconnecting);
        self.after_connection_delay(move |manager| {
            if target.state() != PeripheralState::Disconnecting {
                return;
            }
            target.set_state(PeripheralState::Disconnected);
            lock(&manager.state).connected.remove(&id);
            info!(peripheral = %id, "Disconnected");
            manager.bus.publish(CentralManagerEvent::Disconnected {
                peripheral: target.facade(),
                error: None,
            });
            manager.process_connection_event(ConnectionEvent::PeerDisconnected, &target);
        });
    }

    fn register_for_connection_events(&self, options: Option<ConnectionEventMatchingOptions>) {
        let mut state = lock(&self.state);
        match options {
            None => state.connection_events = None,
            Some(options) => state
                .connection_events
                .get_or_insert_with(Default::default)
                .merge(options),
        }
    }
}

impl std::fmt::Debug for SimulatedCentralManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("SimulatedCentralManager")
            .field("state", &state.manager_state)
            .field("authorization", &state.authorization)
            .field("scanning", &state.scan.is_some())
            .field("peripherals", &state.added.len())
            .finish()
    }
}
