//! GATT server facade
//!
//! Advertising, service publication, ATT request handling and outbound value
//! updates on top of a [`PeripheralManagerBackend`].

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::PeripheralManagerBackend;
use crate::bus::{ActionBus, EventReceiver};
use crate::correlator::{EventStream, Request, Step};
use crate::error::{settle, BleError, Result};
use crate::events::PeripheralManagerEvent;
use crate::model::{
    AdvertisementData, AttRequest, AttResponseCode, Authorization, Central, Characteristic,
    ConnectionLatency, GattService, L2capChannel, ManagerState, Psm, Service,
};
use crate::retry::{self, SendOutcome, UPDATE_VALUE_RETRIES};

/// The local GATT server role
#[derive(Clone)]
pub struct PeripheralManager {
    backend: Arc<dyn PeripheralManagerBackend>,
}

impl PeripheralManager {
    pub fn new(backend: Arc<dyn PeripheralManagerBackend>) -> Self {
        Self { backend }
    }

    pub fn state(&self) -> ManagerState {
        self.backend.state()
    }

    pub fn authorization(&self) -> Authorization {
        self.backend.authorization()
    }

    pub fn is_advertising(&self) -> bool {
        self.backend.is_advertising()
    }

    /// Raw callback stream
    pub fn events(&self) -> EventReceiver<PeripheralManagerEvent> {
        self.bus().subscribe()
    }

    fn bus(&self) -> &ActionBus<PeripheralManagerEvent> {
        self.backend.bus()
    }

    // ------------------------------------------------------------------------
    // Advertising
    // ------------------------------------------------------------------------

    /// Start advertising once the radio is powered on.
    ///
    /// If the manager is not powered on yet the command waits for the
    /// `PoweredOn` state update before it is sent.
    pub fn start_advertising(&self, data: Option<AdvertisementData>) -> Request<()> {
        let sent = Arc::new(AtomicBool::new(false));
        let (issue_sent, match_sent) = (Arc::clone(&sent), sent);
        let issue_backend = Arc::clone(&self.backend);
        let match_backend = Arc::clone(&self.backend);
        let issue_data = data.clone();

        Request::correlate(
            self.bus(),
            move || {
                if issue_backend.state() == ManagerState::PoweredOn {
                    issue_sent.store(true, Ordering::SeqCst);
                    info!("Starting advertising");
                    issue_backend.start_advertising(issue_data);
                } else {
                    debug!("Waiting for power on before advertising");
                }
            },
            move |event| match event {
                PeripheralManagerEvent::StateUpdated(ManagerState::PoweredOn)
                    if !match_sent.swap(true, Ordering::SeqCst) =>
                {
                    info!("Powered on, starting advertising");
                    match_backend.start_advertising(data.clone());
                    None
                }
                PeripheralManagerEvent::AdvertisingStarted { error }
                    if match_sent.load(Ordering::SeqCst) =>
                {
                    Some(settle((), error))
                }
                _ => None,
            },
        )
    }

    pub fn stop_advertising(&self) {
        self.backend.stop_advertising()
    }

    pub fn set_desired_connection_latency(&self, latency: ConnectionLatency, central: &Central) {
        self.backend.set_desired_connection_latency(latency, central)
    }

    // ------------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------------

    /// Publish a service; resolves with its handle once the server added it
    pub fn add_service(&self, service: &GattService) -> Request<Service> {
        let backend = Arc::clone(&self.backend);
        let definition = service.clone();
        let uuid = service.uuid;
        Request::correlate(
            self.bus(),
            move || backend.add_service(&definition),
            move |event| match event {
                PeripheralManagerEvent::ServiceAdded { service, error } if service.uuid == uuid => {
                    Some(settle(service, error))
                }
                _ => None,
            },
        )
    }

    pub fn remove_service(&self, service: &Service) {
        self.backend.remove_service(service)
    }

    pub fn remove_all_services(&self) {
        self.backend.remove_all_services()
    }

    // ------------------------------------------------------------------------
    // ATT Requests
    // ------------------------------------------------------------------------

    pub fn respond(&self, request: &AttRequest, result: AttResponseCode) {
        self.backend.respond(request, result)
    }

    pub fn read_requests(&self) -> EventStream<AttRequest> {
        EventStream::listen(self.bus(), |event| match event {
            PeripheralManagerEvent::ReadRequestReceived(request) => Step::Yield(request),
            _ => Step::Skip,
        })
    }

    pub fn write_requests(&self) -> EventStream<Vec<AttRequest>> {
        EventStream::listen(self.bus(), |event| match event {
            PeripheralManagerEvent::WriteRequestsReceived(requests) => Step::Yield(requests),
            _ => Step::Skip,
        })
    }

    /// `(central, characteristic, subscribed)` for every subscription change
    pub fn subscription_updates(&self) -> EventStream<(Central, Characteristic, bool)> {
        EventStream::listen(self.bus(), |event| match event {
            PeripheralManagerEvent::CentralSubscribed {
                central,
                characteristic,
            } => Step::Yield((central, characteristic, true)),
            PeripheralManagerEvent::CentralUnsubscribed {
                central,
                characteristic,
            } => Step::Yield((central, characteristic, false)),
            _ => Step::Skip,
        })
    }

    pub fn ready_to_update_subscribers(&self) -> EventStream<()> {
        EventStream::listen(self.bus(), |event| match event {
            PeripheralManagerEvent::ReadyToUpdateSubscribers => Step::Yield(()),
            _ => Step::Skip,
        })
    }

    pub fn state_updates(&self) -> EventStream<ManagerState> {
        EventStream::listen(self.bus(), |event| match event {
            PeripheralManagerEvent::StateUpdated(state) => Step::Yield(state),
            _ => Step::Skip,
        })
    }

    // ------------------------------------------------------------------------
    // Value Updates
    // ------------------------------------------------------------------------

    /// Push a value to subscribed centrals (all of them for `None`).
    ///
    /// A refused update is retried on each readiness signal, up to
    /// [`UPDATE_VALUE_RETRIES`] times. The bus subscription is taken when
    /// this is called, so signals sent before the future is first polled
    /// still count.
    pub fn update_value(
        &self,
        value: Vec<u8>,
        characteristic: &Characteristic,
        centrals: Option<Vec<Central>>,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let events = self.bus().subscribe();
        let backend = Arc::clone(&self.backend);
        let characteristic = characteristic.clone();

        async move {
            let outcome = retry::send_until_accepted(
                events,
                || backend.update_value(&value, &characteristic, centrals.as_deref()),
                |event| matches!(event, PeripheralManagerEvent::ReadyToUpdateSubscribers),
                UPDATE_VALUE_RETRIES,
            )
            .await?;

            match outcome {
                SendOutcome::Accepted { .. } => Ok(()),
                SendOutcome::Exhausted => {
                    Err(BleError::FailedToUpdateCharacteristic(characteristic.uuid))
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // L2CAP Channels
    // ------------------------------------------------------------------------

    /// Publish a channel; resolves with the PSM the server assigned
    pub fn publish_l2cap_channel(&self, encryption_required: bool) -> Request<Psm> {
        let backend = Arc::clone(&self.backend);
        Request::correlate(
            self.bus(),
            move || backend.publish_l2cap_channel(encryption_required),
            |event| match event {
                PeripheralManagerEvent::ChannelPublished { psm, error } => Some(settle(psm, error)),
                _ => None,
            },
        )
    }

    pub fn unpublish_l2cap_channel(&self, psm: Psm) -> Request<Psm> {
        let backend = Arc::clone(&self.backend);
        Request::correlate(
            self.bus(),
            move || backend.unpublish_l2cap_channel(psm),
            move |event| match event {
                PeripheralManagerEvent::ChannelUnpublished { psm: unpublished, error }
                    if unpublished == psm =>
                {
                    Some(settle(unpublished, error))
                }
                _ => None,
            },
        )
    }

    /// Channels opened by remote centrals; ends on the first error
    pub fn opened_channels(&self) -> EventStream<L2capChannel> {
        EventStream::listen(self.bus(), |event| match event {
            PeripheralManagerEvent::ChannelOpened { error: Some(err), .. } => Step::Fail(err),
            PeripheralManagerEvent::ChannelOpened {
                channel: Some(channel),
                ..
            } => Step::Yield(channel),
            _ => Step::Skip,
        })
    }
}

impl fmt::Debug for PeripheralManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeripheralManager")
            .field("bus", self.bus())
            .finish_non_exhaustive()
    }
}
