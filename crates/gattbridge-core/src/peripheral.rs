//! Remote peripheral facade
//!
//! Wraps a [`PeripheralBackend`] and exposes its callback-driven commands as
//! correlated requests and streams.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::backend::PeripheralBackend;
use crate::bus::{ActionBus, EventReceiver};
use crate::correlator::{EventStream, Request, Step};
use crate::discovery::DiscoveryRequest;
use crate::error::{settle, BleError, Result};
use crate::events::PeripheralEvent;
use crate::model::{
    Characteristic, CharacteristicProperty, Descriptor, L2capChannel, PeripheralState, Psm,
    Service, WriteType,
};

// ----------------------------------------------------------------------------
// Peripheral
// ----------------------------------------------------------------------------

/// A remote peripheral.
///
/// Cheap to clone; equality and hashing only look at the identifier.
#[derive(Clone)]
pub struct Peripheral {
    id: Uuid,
    backend: Arc<dyn PeripheralBackend>,
}

impl Peripheral {
    pub fn new(backend: Arc<dyn PeripheralBackend>) -> Self {
        Self {
            id: backend.identifier(),
            backend,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> Option<String> {
        self.backend.name()
    }

    pub fn state(&self) -> PeripheralState {
        self.backend.state()
    }

    /// Services discovered so far
    pub fn services(&self) -> Option<Vec<Service>> {
        self.backend.services()
    }

    pub fn can_send_write_without_response(&self) -> bool {
        self.backend.can_send_write_without_response()
    }

    pub fn maximum_write_value_length(&self, write_type: WriteType) -> usize {
        self.backend.maximum_write_value_length(write_type)
    }

    /// Raw callback stream
    pub fn events(&self) -> EventReceiver<PeripheralEvent> {
        self.bus().subscribe()
    }

    fn bus(&self) -> &ActionBus<PeripheralEvent> {
        self.backend.bus()
    }

    // ------------------------------------------------------------------------
    // One-shot Operations
    // ------------------------------------------------------------------------

    pub fn read_rssi(&self) -> Request<f64> {
        let backend = Arc::clone(&self.backend);
        Request::correlate(
            self.bus(),
            move || backend.read_rssi(),
            |event| match event {
                PeripheralEvent::RssiRead { rssi, error } => Some(settle(rssi, error)),
                _ => None,
            },
        )
    }

    /// Discover services; `None` discovers all of them.
    ///
    /// Completes once every requested id has been reported and never
    /// completes if some of them are missing.
    pub fn discover_services(&self, ids: Option<Vec<Uuid>>) -> Request<Vec<Service>> {
        let request = DiscoveryRequest::from(ids);
        let backend = Arc::clone(&self.backend);
        let wanted = request.clone();
        Request::correlate(
            self.bus(),
            move || backend.discover_services(wanted.ids()),
            move |event| match event {
                PeripheralEvent::ServicesDiscovered { error: Some(err), .. } => Some(Err(err)),
                PeripheralEvent::ServicesDiscovered { services, .. } => request
                    .is_complete(services.iter().map(|s| &s.uuid))
                    .then_some(Ok(services)),
                _ => None,
            },
        )
    }

    pub fn discover_included_services(
        &self,
        ids: Option<Vec<Uuid>>,
        service: &Service,
    ) -> Request<Vec<Service>> {
        let request = DiscoveryRequest::from(ids);
        let backend = Arc::clone(&self.backend);
        let wanted = request.clone();
        let parent = service.clone();
        let target = service.clone();
        Request::correlate(
            self.bus(),
            move || backend.discover_included_services(wanted.ids(), &parent),
            move |event| match event {
                PeripheralEvent::IncludedServicesDiscovered {
                    service,
                    included,
                    error,
                } if service == target => match error {
                    Some(err) => Some(Err(err)),
                    None => request
                        .is_complete(included.iter().map(|s| &s.uuid))
                        .then_some(Ok(included)),
                },
                _ => None,
            },
        )
    }

    pub fn discover_characteristics(
        &self,
        ids: Option<Vec<Uuid>>,
        service: &Service,
    ) -> Request<Vec<Characteristic>> {
        let request = DiscoveryRequest::from(ids);
        let backend = Arc::clone(&self.backend);
        let wanted = request.clone();
        let parent = service.clone();
        let target = service.clone();
        Request::correlate(
            self.bus(),
            move || backend.discover_characteristics(wanted.ids(), &parent),
            move |event| match event {
                PeripheralEvent::CharacteristicsDiscovered {
                    service,
                    characteristics,
                    error,
                } if service == target => match error {
                    Some(err) => Some(Err(err)),
                    None => request
                        .is_complete(characteristics.iter().map(|c| &c.uuid))
                        .then_some(Ok(characteristics)),
                },
                _ => None,
            },
        )
    }

    pub fn discover_descriptors(&self, characteristic: &Characteristic) -> Request<Vec<Descriptor>> {
        let backend = Arc::clone(&self.backend);
        let parent = characteristic.clone();
        let target = characteristic.clone();
        Request::correlate(
            self.bus(),
            move || backend.discover_descriptors(&parent),
            move |event| match event {
                PeripheralEvent::DescriptorsDiscovered {
                    characteristic,
                    descriptors,
                    error,
                } if characteristic == target => Some(settle(descriptors, error)),
                _ => None,
            },
        )
    }

    pub fn read_value(&self, characteristic: &Characteristic) -> Request<Option<Vec<u8>>> {
        let backend = Arc::clone(&self.backend);
        let parent = characteristic.clone();
        let target = characteristic.clone();
        Request::correlate(
            self.bus(),
            move || backend.read_value(&parent),
            move |event| match event {
                PeripheralEvent::CharacteristicValueUpdated {
                    characteristic,
                    error,
                } if characteristic == target => Some(settle(characteristic.value, error)),
                _ => None,
            },
        )
    }

    /// Write a characteristic value.
    ///
    /// Writes without response are sent right away and resolve immediately,
    /// or fail if the characteristic does not support them.
    pub fn write_value(
        &self,
        value: Vec<u8>,
        characteristic: &Characteristic,
        write_type: WriteType,
    ) -> Request<()> {
        if write_type == WriteType::WithoutResponse {
            if !characteristic.has_property(CharacteristicProperty::WriteWithoutResponse) {
                return Request::ready(Err(BleError::WriteNotPermitted {
                    characteristic: characteristic.uuid,
                }));
            }
            self.backend.write_value(&value, characteristic, write_type);
            return Request::ready(Ok(()));
        }

        let backend = Arc::clone(&self.backend);
        let parent = characteristic.clone();
        let target = characteristic.clone();
        Request::correlate(
            self.bus(),
            move || backend.write_value(&value, &parent, write_type),
            move |event| match event {
                PeripheralEvent::CharacteristicWritten {
                    characteristic,
                    error,
                } if characteristic == target => Some(settle((), error)),
                _ => None,
            },
        )
    }

    /// Toggle notifications.
    ///
    /// The command is sent immediately rather than on first poll, since
    /// callers turning notifications off rarely wait for the answer.
    pub fn set_notify_value(&self, enabled: bool, characteristic: &Characteristic) -> Request<()> {
        let target = characteristic.clone();
        let request = Request::correlate(
            self.bus(),
            || {},
            move |event| match event {
                PeripheralEvent::NotificationStateUpdated {
                    characteristic,
                    error,
                    ..
                } if characteristic == target => Some(settle((), error)),
                _ => None,
            },
        );
        self.backend.set_notify_value(enabled, characteristic);
        request
    }

    pub fn read_descriptor_value(&self, descriptor: &Descriptor) -> Request<Option<Vec<u8>>> {
        let backend = Arc::clone(&self.backend);
        let parent = descriptor.clone();
        let target = descriptor.clone();
        Request::correlate(
            self.bus(),
            move || backend.read_descriptor_value(&parent),
            move |event| match event {
                PeripheralEvent::DescriptorValueUpdated { descriptor, error } if descriptor == target => {
                    Some(settle(descriptor.value, error))
                }
                _ => None,
            },
        )
    }

    pub fn write_descriptor_value(&self, value: Vec<u8>, descriptor: &Descriptor) -> Request<()> {
        let backend = Arc::clone(&self.backend);
        let parent = descriptor.clone();
        let target = descriptor.clone();
        Request::correlate(
            self.bus(),
            move || backend.write_descriptor_value(&value, &parent),
            move |event| match event {
                PeripheralEvent::DescriptorWritten { descriptor, error } if descriptor == target => {
                    Some(settle((), error))
                }
                _ => None,
            },
        )
    }

    pub fn open_l2cap_channel(&self, psm: Psm) -> Request<L2capChannel> {
        let backend = Arc::clone(&self.backend);
        Request::correlate(
            self.bus(),
            move || backend.open_l2cap_channel(psm),
            move |event| match event {
                PeripheralEvent::ChannelOpened { error: Some(err), .. } => Some(Err(err)),
                PeripheralEvent::ChannelOpened {
                    channel: Some(channel),
                    ..
                } if channel.psm == psm => Some(Ok(channel)),
                _ => None,
            },
        )
    }

    // ------------------------------------------------------------------------
    // Long-lived Operations
    // ------------------------------------------------------------------------

    /// Every value update for a characteristic, whether from reads or
    /// notifications. Ends on the first error.
    pub fn listen_for_updates(&self, characteristic: &Characteristic) -> EventStream<Option<Vec<u8>>> {
        let target = characteristic.clone();
        EventStream::listen(self.bus(), move |event| value_update_step(event, &target))
    }

    /// Enable notifications and stream the values that follow.
    ///
    /// Values start flowing once the peripheral confirms the subscription; a
    /// failed confirmation ends the stream with that error. Dropping an
    /// active stream turns notifications back off.
    pub fn subscribe_to_updates(&self, characteristic: &Characteristic) -> EventStream<Option<Vec<u8>>> {
        let enable = Arc::clone(&self.backend);
        let disable = Arc::clone(&self.backend);
        let on = characteristic.clone();
        let off = characteristic.clone();
        let target = characteristic.clone();
        let mut confirmed = false;

        EventStream::correlate(
            self.bus(),
            move || enable.set_notify_value(true, &on),
            move || {
                debug!(characteristic = %off.uuid, "Unsubscribing from characteristic");
                disable.set_notify_value(false, &off)
            },
            move |event| {
                if confirmed {
                    return value_update_step(event, &target);
                }
                match event {
                    PeripheralEvent::NotificationStateUpdated {
                        characteristic,
                        error,
                        ..
                    } if characteristic == target => match error {
                        Some(err) => Step::Fail(err),
                        None => {
                            confirmed = true;
                            Step::Skip
                        }
                    },
                    _ => Step::Skip,
                }
            },
        )
    }

    pub fn ready_to_send_write_without_response(&self) -> EventStream<()> {
        EventStream::listen(self.bus(), |event| match event {
            PeripheralEvent::ReadyToSendWriteWithoutResponse => Step::Yield(()),
            _ => Step::Skip,
        })
    }

    pub fn name_updates(&self) -> EventStream<Option<String>> {
        EventStream::listen(self.bus(), |event| match event {
            PeripheralEvent::NameUpdated(name) => Step::Yield(name),
            _ => Step::Skip,
        })
    }

    pub fn invalidated_service_updates(&self) -> EventStream<Vec<Service>> {
        EventStream::listen(self.bus(), |event| match event {
            PeripheralEvent::ServicesInvalidated(services) => Step::Yield(services),
            _ => Step::Skip,
        })
    }

    // ------------------------------------------------------------------------
    // Convenience
    // ------------------------------------------------------------------------

    /// Discover a service by id, then the given characteristics inside it
    pub async fn discover_characteristics_in_service(
        &self,
        characteristic_ids: Vec<Uuid>,
        service_id: Uuid,
    ) -> Result<Vec<Characteristic>> {
        let services = self.discover_services(Some(vec![service_id])).await?;
        let service = services
            .into_iter()
            .find(|s| s.uuid == service_id)
            .ok_or(BleError::ServiceNotFound(service_id))?;
        self.discover_characteristics(Some(characteristic_ids), &service)
            .await
    }

    pub async fn discover_characteristic(
        &self,
        characteristic_id: Uuid,
        service_id: Uuid,
    ) -> Result<Characteristic> {
        self.discover_characteristics_in_service(vec![characteristic_id], service_id)
            .await?
            .into_iter()
            .find(|c| c.uuid == characteristic_id)
            .ok_or(BleError::CharacteristicNotFound(characteristic_id))
    }

    pub async fn discover_descriptor(
        &self,
        descriptor_id: Uuid,
        characteristic: &Characteristic,
    ) -> Result<Descriptor> {
        self.discover_descriptors(characteristic)
            .await?
            .into_iter()
            .find(|d| d.uuid == descriptor_id)
            .ok_or(BleError::DescriptorNotFound {
                descriptor: descriptor_id,
                characteristic: characteristic.uuid,
            })
    }

    /// Read a characteristic identified by its id and its service's id
    pub async fn read_value_for(
        &self,
        characteristic_id: Uuid,
        service_id: Uuid,
    ) -> Result<Option<Vec<u8>>> {
        let characteristic = self
            .discover_characteristic(characteristic_id, service_id)
            .await?;
        self.read_value(&characteristic).await
    }

    /// Write a characteristic identified by its id and its service's id
    pub async fn write_value_for(
        &self,
        value: Vec<u8>,
        write_type: WriteType,
        characteristic_id: Uuid,
        service_id: Uuid,
    ) -> Result<()> {
        let characteristic = self
            .discover_characteristic(characteristic_id, service_id)
            .await?;
        self.write_value(value, &characteristic, write_type).await
    }
}

fn value_update_step(event: PeripheralEvent, target: &Characteristic) -> Step<Option<Vec<u8>>> {
    match event {
        PeripheralEvent::CharacteristicValueUpdated {
            characteristic,
            error,
        } if characteristic == *target => match error {
            Some(err) => Step::Fail(err),
            None => Step::Yield(characteristic.value),
        },
        _ => Step::Skip,
    }
}

impl fmt::Debug for Peripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peripheral").field("id", &self.id).finish()
    }
}

impl PartialEq for Peripheral {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Peripheral {}

impl Hash for Peripheral {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
