//! Live central role over the platform Bluetooth stack
//!
//! btleplug exposes async calls instead of delegate callbacks. Each command
//! runs on a spawned task and publishes its outcome on the bus the way a
//! platform delegate would, so the facades work unchanged on top of it.
//!
//! btleplug has no GATT server role and no L2CAP support; opening a channel
//! fails with a platform error.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use btleplug::api::{
    self as bt, Central as _, CentralEvent, CharPropFlags, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral as PlatformPeripheral, PeripheralId};
use futures::{Stream, StreamExt};
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::backend::{CentralManagerBackend, PeripheralBackend};
use crate::bus::ActionBus;
use crate::error::{BleError, Result};
use crate::events::{CentralManagerEvent, PeripheralDiscovery, PeripheralEvent};
use crate::model::{
    AdvertisementData, Authorization, Characteristic, CharacteristicProperty,
    ConnectionEventMatchingOptions, ConnectionOptions, Descriptor, ManagerState, PeripheralState,
    Psm, ScanOptions, Service, WriteType,
};
use crate::peripheral::Peripheral;
use crate::sync::lock;

/// Write length reported for live peripherals
pub const MAXIMUM_WRITE_LENGTH: usize = 512;

fn platform_error(err: btleplug::Error) -> BleError {
    BleError::Platform(err.to_string())
}

/// Stable identifier for a platform peripheral id
fn peripheral_uuid(id: &PeripheralId) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{:?}", id).as_bytes())
}

fn properties_from(flags: CharPropFlags) -> Vec<CharacteristicProperty> {
    [
        (CharPropFlags::BROADCAST, CharacteristicProperty::Broadcast),
        (CharPropFlags::READ, CharacteristicProperty::Read),
        (
            CharPropFlags::WRITE_WITHOUT_RESPONSE,
            CharacteristicProperty::WriteWithoutResponse,
        ),
        (CharPropFlags::WRITE, CharacteristicProperty::Write),
        (CharPropFlags::NOTIFY, CharacteristicProperty::Notify),
        (CharPropFlags::INDICATE, CharacteristicProperty::Indicate),
        (
            CharPropFlags::AUTHENTICATED_SIGNED_WRITES,
            CharacteristicProperty::AuthenticatedSignedWrites,
        ),
        (
            CharPropFlags::EXTENDED_PROPERTIES,
            CharacteristicProperty::ExtendedProperties,
        ),
    ]
    .into_iter()
    .filter(|(flag, _)| flags.contains(*flag))
    .map(|(_, property)| property)
    .collect()
}

fn advertisement_from(properties: &PeripheralProperties) -> AdvertisementData {
    let mut data = AdvertisementData::new().with_service_uuids(properties.services.clone());
    if let Some(name) = &properties.local_name {
        data = data.with_local_name(name.clone());
    }
    if let Some(level) = properties.tx_power_level {
        data = data.with_tx_power_level(level);
    }
    for (service, payload) in &properties.service_data {
        data = data.with_service_data(*service, payload.clone());
    }
    // Manufacturer data is a single blob prefixed by the company id
    if let Some((company, payload)) = properties.manufacturer_data.iter().min_by_key(|(id, _)| **id) {
        let mut blob = company.to_le_bytes().to_vec();
        blob.extend_from_slice(payload);
        data = data.with_manufacturer_data(blob);
    }
    data
}

// ----------------------------------------------------------------------------
// Central Manager
// ----------------------------------------------------------------------------

#[derive(Default)]
struct ScanState {
    scanning: bool,
    allow_duplicates: bool,
    reported: HashSet<Uuid>,
}

/// Central manager backed by the first btleplug adapter
pub struct LiveCentralManager {
    adapter: Adapter,
    bus: ActionBus<CentralManagerEvent>,
    runtime: Handle,
    scan: Mutex<ScanState>,
    peripherals: Mutex<HashMap<Uuid, Arc<LivePeripheralBackend>>>,
}

impl LiveCentralManager {
    /// Open the first adapter and start forwarding its events.
    ///
    /// Must be called from within a tokio runtime; spawned commands run on
    /// that runtime.
    pub async fn new() -> Result<Arc<Self>> {
        let manager = Manager::new().await.map_err(platform_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(platform_error)?
            .into_iter()
            .next()
            .ok_or_else(|| BleError::Platform("No Bluetooth adapter found".to_string()))?;
        let events = adapter.events().await.map_err(platform_error)?;

        let this = Arc::new(Self {
            adapter,
            bus: ActionBus::new(),
            runtime: Handle::current(),
            scan: Mutex::new(ScanState::default()),
            peripherals: Mutex::new(HashMap::new()),
        });
        this.runtime.spawn(Self::forward_events(Arc::downgrade(&this), events));

        info!("Live central manager ready");
        Ok(this)
    }

    async fn forward_events<S>(manager: Weak<Self>, mut events: S)
    where
        S: Stream<Item = CentralEvent> + Unpin,
    {
        while let Some(event) = events.next().await {
            let Some(manager) = manager.upgrade() else {
                break;
            };
            manager.handle_event(event).await;
        }
        debug!("Adapter event stream ended");
    }

    async fn handle_event(&self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                self.report_discovery(&id).await
            }
            CentralEvent::DeviceDisconnected(id) => {
                let known = lock(&self.peripherals).get(&peripheral_uuid(&id)).cloned();
                if let Some(backend) = known {
                    if backend.mark_disconnected() {
                        self.bus.publish(CentralManagerEvent::Disconnected {
                            peripheral: backend.facade(),
                            error: None,
                        });
                    }
                }
            }
            other => trace!(event = ?other, "Ignoring adapter event"),
        }
    }

    async fn report_discovery(&self, id: &PeripheralId) {
        let uuid = peripheral_uuid(id);
        {
            let mut scan = lock(&self.scan);
            if !scan.scanning {
                return;
            }
            if !scan.reported.insert(uuid) && !scan.allow_duplicates {
                return;
            }
        }

        let device = match self.adapter.peripheral(id).await {
            Ok(device) => device,
            Err(e) => {
                warn!(error = %e, "Discovered peripheral vanished");
                return;
            }
        };
        let properties = match device.properties().await {
            Ok(Some(properties)) => properties,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Failed to read advertisement");
                return;
            }
        };

        let backend = self.register(uuid, device);
        backend.update_properties(&properties);
        self.bus
            .publish(CentralManagerEvent::PeripheralDiscovered(PeripheralDiscovery {
                peripheral: backend.facade(),
                advertisement_data: advertisement_from(&properties),
                rssi: properties.rssi.map(f64::from),
            }));
    }

    fn register(&self, uuid: Uuid, device: PlatformPeripheral) -> Arc<LivePeripheralBackend> {
        let runtime = self.runtime.clone();
        lock(&self.peripherals)
            .entry(uuid)
            .or_insert_with(|| Arc::new(LivePeripheralBackend::new(uuid, device, runtime)))
            .clone()
    }

    fn lookup(&self, id: Uuid) -> Option<Arc<LivePeripheralBackend>> {
        lock(&self.peripherals).get(&id).cloned()
    }
}

impl CentralManagerBackend for LiveCentralManager {
    fn bus(&self) -> &ActionBus<CentralManagerEvent> {
        &self.bus
    }

    fn state(&self) -> ManagerState {
        ManagerState::PoweredOn
    }

    fn authorization(&self) -> Authorization {
        Authorization::AllowedAlways
    }

    fn is_scanning(&self) -> bool {
        lock(&self.scan).scanning
    }

    fn retrieve_peripherals(&self, ids: &[Uuid]) -> Vec<Peripheral> {
        let known = lock(&self.peripherals);
        ids.iter()
            .filter_map(|id| known.get(id))
            .map(|backend| backend.facade())
            .collect()
    }

    fn retrieve_connected_peripherals(&self, services: &[Uuid]) -> Vec<Peripheral> {
        lock(&self.peripherals)
            .values()
            .filter(|backend| backend.state().is_connected() && backend.advertises_any(services))
            .map(|backend| backend.facade())
            .collect()
    }

    fn scan_for_peripherals(&self, services: Option<&[Uuid]>, options: &ScanOptions) {
        {
            let mut scan = lock(&self.scan);
            scan.scanning = true;
            scan.allow_duplicates = options.allow_duplicates;
            scan.reported.clear();
        }

        let filter = ScanFilter {
            services: services.map(<[Uuid]>::to_vec).unwrap_or_default(),
        };
        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.start_scan(filter).await {
                warn!(error = %e, "Failed to start scan");
            }
        });
    }

    fn stop_scan(&self) {
        lock(&self.scan).scanning = false;
        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!(error = %e, "Failed to stop scan");
            }
        });
    }

    fn connect(&self, peripheral: &Peripheral, _options: &ConnectionOptions) {
        let Some(backend) = self.lookup(peripheral.id()) else {
            self.bus.publish(CentralManagerEvent::FailedToConnect {
                peripheral: peripheral.clone(),
                error: Some(BleError::UnknownDevice),
            });
            return;
        };

        backend.set_state(PeripheralState::Connecting);
        let bus = self.bus.clone();
        let facade = peripheral.clone();
        self.runtime.spawn(async move {
            match backend.device.connect().await {
                Ok(()) => {
                    backend.set_state(PeripheralState::Connected);
                    bus.publish(CentralManagerEvent::Connected(facade));
                }
                Err(e) => {
                    backend.set_state(PeripheralState::Disconnected);
                    bus.publish(CentralManagerEvent::FailedToConnect {
                        peripheral: facade,
                        error: Some(platform_error(e)),
                    });
                }
            }
        });
    }

    fn cancel_peripheral_connection(&self, peripheral: &Peripheral) {
        let Some(backend) = self.lookup(peripheral.id()) else {
            return;
        };

        backend.set_state(PeripheralState::Disconnecting);
        let bus = self.bus.clone();
        let facade = peripheral.clone();
        self.runtime.spawn(async move {
            match backend.device.disconnect().await {
                Ok(()) => {
                    if backend.mark_disconnected() {
                        bus.publish(CentralManagerEvent::Disconnected {
                            peripheral: facade,
                            error: None,
                        });
                    }
                }
                Err(e) => warn!(error = %e, "Failed to disconnect"),
            }
        });
    }

    fn register_for_connection_events(&self, options: Option<ConnectionEventMatchingOptions>) {
        debug!(?options, "Connection events are not reported by btleplug");
    }
}

// ----------------------------------------------------------------------------
// Peripheral
// ----------------------------------------------------------------------------

#[derive(Default)]
struct LiveState {
    connection: PeripheralState,
    name: Option<String>,
    advertised: Vec<Uuid>,
    services: Option<Vec<Service>>,
}

/// A btleplug peripheral seen by a [`LiveCentralManager`]
pub struct LivePeripheralBackend {
    id: Uuid,
    device: PlatformPeripheral,
    bus: ActionBus<PeripheralEvent>,
    runtime: Handle,
    state: Arc<Mutex<LiveState>>,
    forwarding_notifications: Arc<AtomicBool>,
}

impl LivePeripheralBackend {
    fn new(id: Uuid, device: PlatformPeripheral, runtime: Handle) -> Self {
        Self {
            id,
            device,
            bus: ActionBus::new(),
            runtime,
            state: Arc::new(Mutex::new(LiveState::default())),
            forwarding_notifications: Arc::new(AtomicBool::new(false)),
        }
    }

    fn facade(self: &Arc<Self>) -> Peripheral {
        Peripheral::new(Arc::clone(self) as Arc<dyn PeripheralBackend>)
    }

    fn set_state(&self, connection: PeripheralState) {
        debug!(peripheral = %self.id, ?connection, "Peripheral state changed");
        lock(&self.state).connection = connection;
    }

    /// Record a disconnect; `false` if it was already recorded
    fn mark_disconnected(&self) -> bool {
        let mut state = lock(&self.state);
        let was = std::mem::replace(&mut state.connection, PeripheralState::Disconnected);
        state.services = None;
        was != PeripheralState::Disconnected
    }

    fn advertises_any(&self, services: &[Uuid]) -> bool {
        let state = lock(&self.state);
        services.iter().any(|uuid| state.advertised.contains(uuid))
    }

    fn update_properties(&self, properties: &PeripheralProperties) {
        let renamed = {
            let mut state = lock(&self.state);
            state.advertised = properties.services.clone();
            if state.name != properties.local_name {
                state.name = properties.local_name.clone();
                true
            } else {
                false
            }
        };
        if renamed {
            self.bus
                .publish(PeripheralEvent::NameUpdated(properties.local_name.clone()));
        }
    }

    fn find_characteristic(&self, characteristic: &Characteristic) -> Result<bt::Characteristic> {
        self.device
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic.uuid && c.service_uuid == characteristic.service)
            .ok_or(BleError::CharacteristicNotFound(characteristic.uuid))
    }

    fn find_descriptor(&self, descriptor: &Descriptor) -> Result<bt::Descriptor> {
        self.device
            .characteristics()
            .into_iter()
            .flat_map(|c| c.descriptors.into_iter())
            .find(|d| {
                d.uuid == descriptor.uuid
                    && d.characteristic_uuid == descriptor.characteristic
                    && d.service_uuid == descriptor.service
            })
            .ok_or(BleError::DescriptorNotFound {
                descriptor: descriptor.uuid,
                characteristic: descriptor.characteristic,
            })
    }

    /// Forward notifications for the lifetime of the connection
    fn forward_notifications(&self) {
        if self.forwarding_notifications.swap(true, Ordering::SeqCst) {
            return;
        }

        let id = self.id;
        let device = self.device.clone();
        let bus = self.bus.clone();
        let forwarding = Arc::clone(&self.forwarding_notifications);
        self.runtime.spawn(async move {
            let mut notifications = match device.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "Failed to open notification stream");
                    forwarding.store(false, Ordering::SeqCst);
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                let source = device
                    .characteristics()
                    .into_iter()
                    .find(|c| c.uuid == notification.uuid);
                let Some(source) = source else {
                    trace!(characteristic = %notification.uuid, "Notification for unknown characteristic");
                    continue;
                };
                let service = Service::new(source.service_uuid, id, true);
                let characteristic =
                    Characteristic::new(source.uuid, &service, properties_from(source.properties))
                        .with_value(Some(notification.value));
                bus.publish(PeripheralEvent::CharacteristicValueUpdated {
                    characteristic,
                    error: None,
                });
            }

            forwarding.store(false, Ordering::SeqCst);
            debug!(peripheral = %id, "Notification stream ended");
        });
    }
}

impl PeripheralBackend for LivePeripheralBackend {
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
        lock(&self.state).connection
    }

    fn services(&self) -> Option<Vec<Service>> {
        lock(&self.state).services.clone()
    }

    fn can_send_write_without_response(&self) -> bool {
        true
    }

    fn maximum_write_value_length(&self, _write_type: WriteType) -> usize {
        MAXIMUM_WRITE_LENGTH
    }

    fn read_rssi(&self) {
        let device = self.device.clone();
        let bus = self.bus.clone();
        self.runtime.spawn(async move {
            let event = match device.properties().await {
                Ok(Some(PeripheralProperties { rssi: Some(rssi), .. })) => PeripheralEvent::RssiRead {
                    rssi: f64::from(rssi),
                    error: None,
                },
                Ok(_) => PeripheralEvent::RssiRead {
                    rssi: 0.0,
                    error: Some(BleError::Platform("RSSI unavailable".to_string())),
                },
                Err(e) => PeripheralEvent::RssiRead {
                    rssi: 0.0,
                    error: Some(platform_error(e)),
                },
            };
            bus.publish(event);
        });
    }

    fn discover_services(&self, _ids: Option<&[Uuid]>) {
        let id = self.id;
        let device = self.device.clone();
        let bus = self.bus.clone();
        let state = Arc::clone(&self.state);
        self.runtime.spawn(async move {
            let error = device.discover_services().await.err().map(platform_error);
            let services: Vec<Service> = device
                .services()
                .into_iter()
                .map(|s| Service::new(s.uuid, id, s.primary))
                .collect();
            lock(&state).services = Some(services.clone());
            bus.publish(PeripheralEvent::ServicesDiscovered { services, error });
        });
    }

    fn discover_included_services(&self, _ids: Option<&[Uuid]>, service: &Service) {
        // Not exposed by btleplug; report an empty set
        self.bus.publish(PeripheralEvent::IncludedServicesDiscovered {
            service: service.clone(),
            included: Vec::new(),
            error: None,
        });
    }

    fn discover_characteristics(&self, _ids: Option<&[Uuid]>, service: &Service) {
        let found = self
            .device
            .services()
            .into_iter()
            .find(|s| s.uuid == service.uuid)
            .map(|s| {
                s.characteristics
                    .iter()
                    .map(|c| Characteristic::new(c.uuid, service, properties_from(c.properties)))
                    .collect::<Vec<_>>()
            });

        let (characteristics, error) = match found {
            Some(characteristics) => (characteristics, None),
            None => (Vec::new(), Some(BleError::ServiceNotFound(service.uuid))),
        };
        self.bus.publish(PeripheralEvent::CharacteristicsDiscovered {
            service: service.clone(),
            characteristics,
            error,
        });
    }

    fn discover_descriptors(&self, characteristic: &Characteristic) {
        let (descriptors, error) = match self.find_characteristic(characteristic) {
            Ok(source) => (
                source
                    .descriptors
                    .iter()
                    .map(|d| Descriptor::new(d.uuid, characteristic))
                    .collect(),
                None,
            ),
            Err(err) => (Vec::new(), Some(err)),
        };
        self.bus.publish(PeripheralEvent::DescriptorsDiscovered {
            characteristic: characteristic.clone(),
            descriptors,
            error,
        });
    }

    fn read_value(&self, characteristic: &Characteristic) {
        let target = characteristic.clone();
        let source = match self.find_characteristic(characteristic) {
            Ok(source) => source,
            Err(err) => {
                self.bus.publish(PeripheralEvent::CharacteristicValueUpdated {
                    characteristic: target,
                    error: Some(err),
                });
                return;
            }
        };

        let device = self.device.clone();
        let bus = self.bus.clone();
        self.runtime.spawn(async move {
            let event = match device.read(&source).await {
                Ok(value) => PeripheralEvent::CharacteristicValueUpdated {
                    characteristic: target.with_value(Some(value)),
                    error: None,
                },
                Err(e) => PeripheralEvent::CharacteristicValueUpdated {
                    characteristic: target,
                    error: Some(platform_error(e)),
                },
            };
            bus.publish(event);
        });
    }

    fn write_value(&self, value: &[u8], characteristic: &Characteristic, write_type: WriteType) {
        let target = characteristic.clone();
        let with_response = write_type == WriteType::WithResponse;
        let source = match self.find_characteristic(characteristic) {
            Ok(source) => source,
            Err(err) => {
                if with_response {
                    self.bus.publish(PeripheralEvent::CharacteristicWritten {
                        characteristic: target,
                        error: Some(err),
                    });
                } else {
                    warn!(error = %err, "Dropping write without response");
                }
                return;
            }
        };

        let platform_type = if with_response {
            bt::WriteType::WithResponse
        } else {
            bt::WriteType::WithoutResponse
        };
        let value = value.to_vec();
        let device = self.device.clone();
        let bus = self.bus.clone();
        self.runtime.spawn(async move {
            let error = device
                .write(&source, &value, platform_type)
                .await
                .err()
                .map(platform_error);
            if with_response {
                bus.publish(PeripheralEvent::CharacteristicWritten {
                    characteristic: target,
                    error,
                });
            } else if let Some(err) = error {
                warn!(error = %err, "Write without response failed");
            }
        });
    }

    fn set_notify_value(&self, enabled: bool, characteristic: &Characteristic) {
        let target = characteristic.clone();
        let source = match self.find_characteristic(characteristic) {
            Ok(source) => source,
            Err(err) => {
                self.bus.publish(PeripheralEvent::NotificationStateUpdated {
                    characteristic: target,
                    is_notifying: false,
                    error: Some(err),
                });
                return;
            }
        };
        if enabled {
            self.forward_notifications();
        }

        let device = self.device.clone();
        let bus = self.bus.clone();
        self.runtime.spawn(async move {
            let result = if enabled {
                device.subscribe(&source).await
            } else {
                device.unsubscribe(&source).await
            };
            let error = result.err().map(platform_error);
            bus.publish(PeripheralEvent::NotificationStateUpdated {
                characteristic: target,
                is_notifying: enabled && error.is_none(),
                error,
            });
        });
    }

    fn read_descriptor_value(&self, descriptor: &Descriptor) {
        let target = descriptor.clone();
        let source = match self.find_descriptor(descriptor) {
            Ok(source) => source,
            Err(err) => {
                self.bus.publish(PeripheralEvent::DescriptorValueUpdated {
                    descriptor: target,
                    error: Some(err),
                });
                return;
            }
        };

        let device = self.device.clone();
        let bus = self.bus.clone();
        self.runtime.spawn(async move {
            let event = match device.read_descriptor(&source).await {
                Ok(value) => PeripheralEvent::DescriptorValueUpdated {
                    descriptor: target.with_value(Some(value)),
                    error: None,
                },
                Err(e) => PeripheralEvent::DescriptorValueUpdated {
                    descriptor: target,
                    error: Some(platform_error(e)),
                },
            };
            bus.publish(event);
        });
    }

    fn write_descriptor_value(&self, value: &[u8], descriptor: &Descriptor) {
        let target = descriptor.clone();
        let source = match self.find_descriptor(descriptor) {
            Ok(source) => source,
            Err(err) => {
                self.bus.publish(PeripheralEvent::DescriptorWritten {
                    descriptor: target,
                    error: Some(err),
                });
                return;
            }
        };

        let value = value.to_vec();
        let device = self.device.clone();
        let bus = self.bus.clone();
        self.runtime.spawn(async move {
            let error = device
                .write_descriptor(&source, &value)
                .await
                .err()
                .map(platform_error);
            bus.publish(PeripheralEvent::DescriptorWritten {
                descriptor: target,
                error,
            });
        });
    }

    fn open_l2cap_channel(&self, psm: Psm) {
        debug!(psm, "L2CAP channels are not supported by btleplug");
        self.bus.publish(PeripheralEvent::ChannelOpened {
            channel: None,
            error: Some(BleError::Platform(
                "L2CAP channels are not supported by btleplug".to_string(),
            )),
        });
    }
}
