//! Simulated remote peripheral
//!
//! [`SimulatedPeripheral`] implements [`PeripheralBackend`] against an owned
//! GATT database. Every command is answered after the configured handling
//! delay; reads, writes and notification toggles are delegated to a
//! [`PeripheralHandler`].
//!
//! Commands still waiting for their answer when the peripheral is forced to
//! `Disconnected` are failed right away with
//! [`BleError::PeripheralDisconnected`] and never answered afterwards.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use gattbridge_core::sync::lock;
use gattbridge_core::{
    merge_discovered, ActionBus, AdvertisementData, AttResponseCode, BleError, ChannelIo,
    Characteristic, CharacteristicProperty, Descriptor, GattService, L2capChannel, Peripheral,
    PeripheralBackend, PeripheralEvent, PeripheralState, Psm, Service, WriteType,
};
use tokio::io::DuplexStream;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::advertiser::Advertiser;
use crate::config::SimulationConfig;
use crate::handler::{PeripheralHandler, SilentHandler};

/// Included service definitions keyed by the uuid of their parent service
pub type IncludedServices = HashMap<Uuid, Vec<GattService>>;

// ----------------------------------------------------------------------------
// State
// ----------------------------------------------------------------------------

/// A command waiting for its delayed answer
struct InFlight {
    abort: Option<AbortHandle>,
    /// Published instead of the answer if the peripheral disconnects first
    failure: Option<PeripheralEvent>,
}

struct SimState {
    name: Option<String>,
    state: PeripheralState,
    discoverable: bool,
    connectable: bool,
    services: Option<Vec<GattService>>,
    included_services: Option<IncludedServices>,
    rssi: f64,
    maximum_write_with_response: usize,
    maximum_write_without_response: usize,
    can_send_write_without_response: bool,
    open_channel_error: Option<BleError>,
    handler: Option<Arc<dyn PeripheralHandler>>,

    discovered_services: Option<Vec<Service>>,
    discovered_included: HashMap<Service, Vec<Service>>,
    discovered_characteristics: HashMap<Service, Vec<Characteristic>>,
    discovered_descriptors: HashMap<Characteristic, Vec<Descriptor>>,
    notifying: HashSet<Characteristic>,

    channel_remotes: HashMap<Psm, DuplexStream>,
    in_flight: HashMap<u64, InFlight>,
    next_ticket: u64,
}

impl SimState {
    fn invalidate_discovery(&mut self) {
        self.discovered_services = None;
        self.discovered_included.clear();
        self.discovered_characteristics.clear();
        self.discovered_descriptors.clear();
    }

    /// Definition of a service, top-level or included
    fn definition(&self, service: Uuid) -> Option<&GattService> {
        let top = self.services.iter().flatten();
        let included = self.included_services.iter().flat_map(|map| map.values().flatten());
        top.chain(included).find(|s| s.uuid == service)
    }

    fn definition_mut(&mut self, service: Uuid) -> Option<&mut GattService> {
        let top = self.services.iter_mut().flatten();
        let included = self
            .included_services
            .iter_mut()
            .flat_map(|map| map.values_mut().flatten());
        top.chain(included).find(|s| s.uuid == service)
    }

    fn store_value(&mut self, characteristic: &Characteristic, value: &[u8]) {
        if let Some(definition) = self
            .definition_mut(characteristic.service)
            .and_then(|s| s.characteristics.iter_mut().find(|c| c.uuid == characteristic.uuid))
        {
            definition.value = Some(value.to_vec());
        }
    }

    fn store_descriptor_value(&mut self, descriptor: &Descriptor, value: &[u8]) {
        if let Some(definition) = self
            .definition_mut(descriptor.service)
            .and_then(|s| s.characteristics.iter_mut().find(|c| c.uuid == descriptor.characteristic))
            .and_then(|c| c.descriptors.iter_mut().find(|d| d.uuid == descriptor.uuid))
        {
            definition.value = Some(value.to_vec());
        }
    }
}

// ----------------------------------------------------------------------------
// Simulated Peripheral
// ----------------------------------------------------------------------------

/// A peripheral living entirely in memory
pub struct SimulatedPeripheral {
    id: Uuid,
    config: SimulationConfig,
    bus: ActionBus<PeripheralEvent>,
    advertiser: watch::Sender<Option<Advertiser>>,
    state: Mutex<SimState>,
    this: Weak<Self>,
}

impl SimulatedPeripheral {
    /// Peripheral with a random identifier and the default configuration
    pub fn new(name: Option<&str>) -> Arc<Self> {
        Self::with_config(Uuid::new_v4(), name, SimulationConfig::default())
    }

    pub fn with_config(id: Uuid, name: Option<&str>, config: SimulationConfig) -> Arc<Self> {
        let advertiser = Advertiser::new(config.advertising_interval, AdvertisementData::new());
        let (advertiser, _) = watch::channel(Some(advertiser));
        let handler: Arc<dyn PeripheralHandler> = Arc::new(SilentHandler);

        Arc::new_cyclic(|this| Self {
            id,
            bus: ActionBus::new(),
            advertiser,
            state: Mutex::new(SimState {
                name: name.map(str::to_string),
                state: PeripheralState::Disconnected,
                discoverable: true,
                connectable: true,
                services: None,
                included_services: None,
                rssi: 0.0,
                maximum_write_with_response: config.maximum_write_length,
                maximum_write_without_response: config.maximum_write_length,
                can_send_write_without_response: true,
                open_channel_error: None,
                handler: Some(handler),
                discovered_services: None,
                discovered_included: HashMap::new(),
                discovered_characteristics: HashMap::new(),
                discovered_descriptors: HashMap::new(),
                notifying: HashSet::new(),
                channel_remotes: HashMap::new(),
                in_flight: HashMap::new(),
                next_ticket: 0,
            }),
            config,
            this: this.clone(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Facade a central uses to talk to this peripheral
    pub fn facade(self: &Arc<Self>) -> Peripheral {
        Peripheral::new(Arc::clone(self) as Arc<dyn PeripheralBackend>)
    }

    // ------------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------------

    pub fn set_name(&self, name: Option<&str>) {
        let name = name.map(str::to_string);
        lock(&self.state).name = name.clone();
        self.bus.publish(PeripheralEvent::NameUpdated(name));
    }

    /// Change the connection state.
    ///
    /// Every state change drops the discovery caches. Moving to
    /// `Disconnected` also fails in-flight commands and forgets which
    /// characteristics were notifying.
    pub fn set_state(&self, new_state: PeripheralState) {
        let failures: Vec<PeripheralEvent> = {
            let mut state = lock(&self.state);
            let old_state = state.state;
            state.state = new_state;
            state.invalidate_discovery();
            debug!(peripheral = %self.id, ?old_state, ?new_state, "Peripheral state changed");

            if new_state == PeripheralState::Disconnected {
                state.notifying.clear();
                state
                    .in_flight
                    .drain()
                    .filter_map(|(_, pending)| {
                        if let Some(abort) = pending.abort {
                            abort.abort();
                        }
                        pending.failure
                    })
                    .collect()
            } else {
                Vec::new()
            }
        };

        if !failures.is_empty() {
            info!(peripheral = %self.id, count = failures.len(), "Failing commands orphaned by disconnect");
        }
        for failure in failures {
            self.bus.publish(failure);
        }
    }

    pub fn is_discoverable(&self) -> bool {
        lock(&self.state).discoverable
    }

    pub fn set_discoverable(&self, discoverable: bool) {
        lock(&self.state).discoverable = discoverable;
    }

    pub fn is_connectable(&self) -> bool {
        lock(&self.state).connectable
    }

    pub fn set_connectable(&self, connectable: bool) {
        lock(&self.state).connectable = connectable;
    }

    pub fn advertiser(&self) -> Option<Advertiser> {
        self.advertiser.borrow().clone()
    }

    /// Replace the advertiser; `None` stops advertising
    pub fn set_advertiser(&self, advertiser: Option<Advertiser>) {
        self.advertiser.send_replace(advertiser);
    }

    pub(crate) fn watch_advertiser(&self) -> watch::Receiver<Option<Advertiser>> {
        self.advertiser.subscribe()
    }

    /// Service types the peripheral declares, discovered or not
    pub fn declared_service_uuids(&self) -> Vec<Uuid> {
        lock(&self.state)
            .services
            .iter()
            .flatten()
            .map(|s| s.uuid)
            .collect()
    }

    /// Replace the GATT database, invalidating what was discovered of it
    pub fn set_services(&self, services: Option<Vec<GattService>>) {
        let invalidated = {
            let mut state = lock(&self.state);
            state.services = services;
            state.discovered_characteristics.clear();
            state.discovered_descriptors.clear();
            state.discovered_services.take()
        };
        if let Some(invalidated) = invalidated {
            debug!(peripheral = %self.id, count = invalidated.len(), "Services invalidated");
            self.bus.publish(PeripheralEvent::ServicesInvalidated(invalidated));
        }
    }

    pub fn set_included_services(&self, included: Option<IncludedServices>) {
        let invalidated: Vec<Service> = {
            let mut state = lock(&self.state);
            state.included_services = included;
            std::mem::take(&mut state.discovered_included)
                .into_values()
                .flatten()
                .collect()
        };
        if !invalidated.is_empty() {
            self.bus.publish(PeripheralEvent::ServicesInvalidated(invalidated));
        }
    }

    /// Signal strength reported by `read_rssi`
    pub fn set_rssi(&self, rssi: f64) {
        lock(&self.state).rssi = rssi;
        self.bus.publish(PeripheralEvent::RssiRead { rssi, error: None });
    }

    pub fn set_maximum_write_value_length(&self, write_type: WriteType, length: usize) {
        let mut state = lock(&self.state);
        match write_type {
            WriteType::WithResponse => state.maximum_write_with_response = length,
            WriteType::WithoutResponse => state.maximum_write_without_response = length,
        }
    }

    pub fn set_can_send_write_without_response(&self, can_send: bool) {
        lock(&self.state).can_send_write_without_response = can_send;
        if can_send {
            self.bus.publish(PeripheralEvent::ReadyToSendWriteWithoutResponse);
        }
    }

    /// Error returned by the next channel opens; `None` lets them succeed
    pub fn set_open_channel_error(&self, error: Option<BleError>) {
        lock(&self.state).open_channel_error = error;
    }

    /// Install the ATT handler; `None` answers every request with
    /// "request not supported"
    pub fn set_handler(&self, handler: Option<Arc<dyn PeripheralHandler>>) {
        lock(&self.state).handler = handler;
    }

    pub fn is_notifying(&self, characteristic: &Characteristic) -> bool {
        lock(&self.state).notifying.contains(characteristic)
    }

    /// Remote end of the last channel opened on `psm`
    pub fn take_channel_remote(&self, psm: Psm) -> Option<DuplexStream> {
        lock(&self.state).channel_remotes.remove(&psm)
    }

    // ------------------------------------------------------------------------
    // Peripheral Side Pushes
    // ------------------------------------------------------------------------

    /// Push a characteristic value as if the peripheral notified it
    pub fn update_value(&self, characteristic: &Characteristic, value: Vec<u8>) {
        lock(&self.state).store_value(characteristic, &value);
        self.bus.publish(PeripheralEvent::CharacteristicValueUpdated {
            characteristic: characteristic.clone().with_value(Some(value)),
            error: None,
        });
    }

    pub fn update_descriptor_value(&self, descriptor: &Descriptor, value: Vec<u8>) {
        lock(&self.state).store_descriptor_value(descriptor, &value);
        self.bus.publish(PeripheralEvent::DescriptorValueUpdated {
            descriptor: descriptor.clone().with_value(Some(value)),
            error: None,
        });
    }

    // ------------------------------------------------------------------------
    // Delayed Answers
    // ------------------------------------------------------------------------

    /// Answer a command after the handling delay.
    ///
    /// `work` runs the handler; the closure it yields applies the outcome to
    /// the simulated state and returns the event to publish. Both are skipped
    /// if the command was failed by a disconnect in the meantime.
    fn handle<W, Fut, S>(&self, failure: Option<PeripheralEvent>, work: W)
    where
        W: FnOnce(Option<Arc<dyn PeripheralHandler>>) -> Fut + Send + 'static,
        Fut: Future<Output = S> + Send + 'static,
        S: FnOnce(&mut SimState) -> Option<PeripheralEvent> + Send + 'static,
    {
        let ticket = {
            let mut state = lock(&self.state);
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.in_flight.insert(
                ticket,
                InFlight {
                    abort: None,
                    failure,
                },
            );
            ticket
        };

        let this = self.this.clone();
        let delay = self.config.handling_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(handler) = this.upgrade().map(|p| p.handler()) else {
                return;
            };
            let settle = work(handler).await;
            if let Some(peripheral) = this.upgrade() {
                peripheral.settle(ticket, settle);
            }
        });

        if let Some(pending) = lock(&self.state).in_flight.get_mut(&ticket) {
            pending.abort = Some(task.abort_handle());
        }
    }

    fn settle<S>(&self, ticket: u64, settle: S)
    where
        S: FnOnce(&mut SimState) -> Option<PeripheralEvent>,
    {
        let event = {
            let mut state = lock(&self.state);
            if state.in_flight.remove(&ticket).is_none() {
                trace!(peripheral = %self.id, ticket, "Answer dropped after disconnect");
                return;
            }
            settle(&mut *state)
        };
        if let Some(event) = event {
            self.bus.publish(event);
        }
    }

    fn handler(&self) -> Option<Arc<dyn PeripheralHandler>> {
        lock(&self.state).handler.clone()
    }
}

fn disconnected() -> Option<BleError> {
    Some(BleError::PeripheralDisconnected)
}

fn not_supported() -> BleError {
    BleError::Att(AttResponseCode::RequestNotSupported)
}

fn requested(ids: Option<&[Uuid]>, uuid: &Uuid) -> bool {
    ids.map_or(true, |ids| ids.contains(uuid))
}

/// Record a discovery report in its cache. Asking for everything replaces
/// the cache, asking for specific ids merges into it.
fn record<T>(cache: &mut Vec<T>, found: &[T], everything: bool)
where
    T: Clone + Eq + std::hash::Hash,
{
    if everything {
        *cache = found.to_vec();
    } else {
        merge_discovered(cache, found.to_vec());
    }
}

// ----------------------------------------------------------------------------
// Backend
// ----------------------------------------------------------------------------

impl PeripheralBackend for SimulatedPeripheral {
    fn identifier(&self) -> Uuid {
        self.id
    }

    fn bus(&self) -> &ActionBus<PeripheralEvent> {
        &self.bus
    }

    fn name(&self) -> Option<String> {
        lock(&self.state).name.clone()
    }

    fn state(&self) -> PeripheralState {
        lock(&self.state).state
    }

    fn services(&self) -> Option<Vec<Service>> {
        lock(&self.state).discovered_services.clone()
    }

    fn can_send_write_without_response(&self) -> bool {
        lock(&self.state).can_send_write_without_response
    }

    fn maximum_write_value_length(&self, write_type: WriteType) -> usize {
        let state = lock(&self.state);
        match write_type {
            WriteType::WithResponse => state.maximum_write_with_response,
            WriteType::WithoutResponse => state.maximum_write_without_response,
        }
    }

    fn read_rssi(&self) {
        let rssi = lock(&self.state).rssi;
        self.bus.publish(PeripheralEvent::RssiRead { rssi, error: None });
    }

    fn discover_services(&self, ids: Option<&[Uuid]>) {
        let ids = ids.map(<[Uuid]>::to_vec);
        let peripheral = self.id;
        let failure = PeripheralEvent::ServicesDiscovered {
            services: Vec::new(),
            error: disconnected(),
        };
        self.handle(Some(failure), move |_| async move {
            move |state: &mut SimState| {
                let found: Vec<Service> = state
                    .services
                    .iter()
                    .flatten()
                    .filter(|s| requested(ids.as_deref(), &s.uuid))
                    .map(|s| s.handle(peripheral))
                    .collect();
                let discovered = state.discovered_services.get_or_insert_with(Vec::new);
                record(discovered, &found, ids.is_none());
                Some(PeripheralEvent::ServicesDiscovered {
                    services: found,
                    error: None,
                })
            }
        });
    }

    fn discover_included_services(&self, ids: Option<&[Uuid]>, service: &Service) {
        let ids = ids.map(<[Uuid]>::to_vec);
        let service = service.clone();
        let failure = PeripheralEvent::IncludedServicesDiscovered {
            service: service.clone(),
            included: Vec::new(),
            error: disconnected(),
        };
        self.handle(Some(failure), move |_| async move {
            move |state: &mut SimState| {
                let found: Vec<Service> = state
                    .included_services
                    .as_ref()
                    .and_then(|map| map.get(&service.uuid))
                    .into_iter()
                    .flatten()
                    .filter(|s| requested(ids.as_deref(), &s.uuid))
                    .map(|s| s.handle(service.peripheral))
                    .collect();
                let included = state.discovered_included.entry(service.clone()).or_default();
                record(included, &found, ids.is_none());
                Some(PeripheralEvent::IncludedServicesDiscovered {
                    included: found,
                    service,
                    error: None,
                })
            }
        });
    }

    fn discover_characteristics(&self, ids: Option<&[Uuid]>, service: &Service) {
        let ids = ids.map(<[Uuid]>::to_vec);
        let service = service.clone();
        let failure = PeripheralEvent::CharacteristicsDiscovered {
            service: service.clone(),
            characteristics: Vec::new(),
            error: disconnected(),
        };
        self.handle(Some(failure), move |_| async move {
            move |state: &mut SimState| {
                let found: Vec<Characteristic> = state
                    .definition(service.uuid)
                    .map(|definition| {
                        definition
                            .characteristics
                            .iter()
                            .filter(|c| requested(ids.as_deref(), &c.uuid))
                            .map(|c| c.handle(&service))
                            .collect()
                    })
                    .unwrap_or_default();
                let characteristics = state
                    .discovered_characteristics
                    .entry(service.clone())
                    .or_default();
                record(characteristics, &found, ids.is_none());
                Some(PeripheralEvent::CharacteristicsDiscovered {
                    characteristics: found,
                    service,
                    error: None,
                })
            }
        });
    }

    fn discover_descriptors(&self, characteristic: &Characteristic) {
        let characteristic = characteristic.clone();
        let failure = PeripheralEvent::DescriptorsDiscovered {
            characteristic: characteristic.clone(),
            descriptors: Vec::new(),
            error: disconnected(),
        };
        self.handle(Some(failure), move |_| async move {
            move |state: &mut SimState| {
                let found: Vec<Descriptor> = state
                    .definition(characteristic.service)
                    .and_then(|s| s.characteristic(characteristic.uuid))
                    .map(|c| c.descriptors.iter().map(|d| d.handle(&characteristic)).collect())
                    .unwrap_or_default();
                let descriptors = state
                    .discovered_descriptors
                    .entry(characteristic.clone())
                    .or_default();
                record(descriptors, &found, true);
                Some(PeripheralEvent::DescriptorsDiscovered {
                    descriptors: found,
                    characteristic,
                    error: None,
                })
            }
        });
    }

    fn read_value(&self, characteristic: &Characteristic) {
        let characteristic = characteristic.clone();
        let failure = PeripheralEvent::CharacteristicValueUpdated {
            characteristic: characteristic.clone(),
            error: disconnected(),
        };
        self.handle(Some(failure), move |handler| async move {
            let outcome = match handler {
                Some(handler) => handler.read_value(&characteristic).await,
                None => Err(not_supported()),
            };
            move |state: &mut SimState| {
                Some(match outcome {
                    Ok(value) => {
                        state.store_value(&characteristic, &value);
                        PeripheralEvent::CharacteristicValueUpdated {
                            characteristic: characteristic.with_value(Some(value)),
                            error: None,
                        }
                    }
                    Err(error) => PeripheralEvent::CharacteristicValueUpdated {
                        characteristic,
                        error: Some(error),
                    },
                })
            }
        });
    }

    fn write_value(&self, value: &[u8], characteristic: &Characteristic, write_type: WriteType) {
        let value = value.to_vec();
        let characteristic = characteristic.clone();

        if write_type == WriteType::WithoutResponse {
            // a controller silently drops writes it cannot take
            let has_handler = lock(&self.state).handler.is_some();
            if !has_handler
                || !characteristic.has_property(CharacteristicProperty::WriteWithoutResponse)
            {
                debug!(
                    peripheral = %self.id,
                    characteristic = %characteristic.uuid,
                    "Dropping unsupported write without response"
                );
                return;
            }
            let peripheral = self.id;
            self.handle(None, move |handler| async move {
                if let Some(handler) = handler {
                    if let Err(error) = handler.write_value(&characteristic, &value, write_type).await {
                        debug!(%peripheral, %error, "Write without response refused");
                    }
                }
                |_: &mut SimState| -> Option<PeripheralEvent> { None }
            });
            return;
        }

        let failure = PeripheralEvent::CharacteristicWritten {
            characteristic: characteristic.clone(),
            error: disconnected(),
        };
        self.handle(Some(failure), move |handler| async move {
            let outcome = match handler {
                Some(handler) => handler.write_value(&characteristic, &value, write_type).await,
                None => Err(not_supported()),
            };
            move |_: &mut SimState| {
                Some(PeripheralEvent::CharacteristicWritten {
                    characteristic,
                    error: outcome.err(),
                })
            }
        });
    }

    fn set_notify_value(&self, enabled: bool, characteristic: &Characteristic) {
        let characteristic = characteristic.clone();
        let failure = PeripheralEvent::NotificationStateUpdated {
            characteristic: characteristic.clone(),
            is_notifying: false,
            error: disconnected(),
        };
        self.handle(Some(failure), move |handler| async move {
            let outcome = match handler {
                Some(handler) => handler.set_notify_value(&characteristic, enabled).await,
                None => Err(not_supported()),
            };
            move |state: &mut SimState| {
                if outcome.is_ok() {
                    if enabled {
                        state.notifying.insert(characteristic.clone());
                    } else {
                        state.notifying.remove(&characteristic);
                    }
                }
                let is_notifying = state.notifying.contains(&characteristic);
                Some(PeripheralEvent::NotificationStateUpdated {
                    characteristic,
                    is_notifying,
                    error: outcome.err(),
                })
            }
        });
    }

    fn read_descriptor_value(&self, descriptor: &Descriptor) {
        let descriptor = descriptor.clone();
        let failure = PeripheralEvent::DescriptorValueUpdated {
            descriptor: descriptor.clone(),
            error: disconnected(),
        };
        self.handle(Some(failure), move |handler| async move {
            let outcome = match handler {
                Some(handler) => handler.read_descriptor_value(&descriptor).await,
                None => Err(not_supported()),
            };
            move |state: &mut SimState| {
                Some(match outcome {
                    Ok(value) => {
                        state.store_descriptor_value(&descriptor, &value);
                        PeripheralEvent::DescriptorValueUpdated {
                            descriptor: descriptor.with_value(Some(value)),
                            error: None,
                        }
                    }
                    Err(error) => PeripheralEvent::DescriptorValueUpdated {
                        descriptor,
                        error: Some(error),
                    },
                })
            }
        });
    }

    fn write_descriptor_value(&self, value: &[u8], descriptor: &Descriptor) {
        let value = value.to_vec();
        let descriptor = descriptor.clone();
        let failure = PeripheralEvent::DescriptorWritten {
            descriptor: descriptor.clone(),
            error: disconnected(),
        };
        self.handle(Some(failure), move |handler| async move {
            let outcome = match handler {
                Some(handler) => handler.write_descriptor_value(&descriptor, &value).await,
                None => Err(not_supported()),
            };
            move |_: &mut SimState| {
                Some(PeripheralEvent::DescriptorWritten {
                    descriptor,
                    error: outcome.err(),
                })
            }
        });
    }

    fn open_l2cap_channel(&self, psm: Psm) {
        let peer = self.id;
        let buffer = self.config.channel_buffer_size;
        let failure = PeripheralEvent::ChannelOpened {
            channel: None,
            error: disconnected(),
        };
        self.handle(Some(failure), move |_| async move {
            move |state: &mut SimState| {
                if let Some(error) = state.open_channel_error.clone() {
                    return Some(PeripheralEvent::ChannelOpened {
                        channel: None,
                        error: Some(error),
                    });
                }
                let (local, remote) = tokio::io::duplex(buffer);
                state.channel_remotes.insert(psm, remote);
                Some(PeripheralEvent::ChannelOpened {
                    channel: Some(L2capChannel::new(peer, psm, ChannelIo::new(local))),
                    error: None,
                })
            }
        });
    }
}

impl std::fmt::Debug for SimulatedPeripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("SimulatedPeripheral")
            .field("id", &self.id)
            .field("name", &state.name)
            .field("state", &state.state)
            .finish_non_exhaustive()
    }
}
