//! Simulated GATT server
//!
//! [`SimulatedPeripheralManager`] plays the local peripheral role. Tests act
//! as the remote centrals: they subscribe, issue read and write requests and
//! open L2CAP channels through the methods in the "Remote Centrals" section,
//! and the server answers through the [`PeripheralManagerBackend`] commands.
//!
//! Every operation requires the manager to be powered on and authorized.
//! Calling one in any other state is a bug in the test and panics.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use gattbridge_core::sync::lock;
use gattbridge_core::{
    ActionBus, AdvertisementData, AttRequest, AttResponseCode, Authorization, BleError, Central,
    ChannelIo, Characteristic, ConnectionLatency, GattService, L2capChannel, ManagerState,
    PeripheralManagerBackend, PeripheralManagerEvent, Psm, Result, Service, LOCAL_PERIPHERAL,
};
use tokio::io::DuplexStream;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SimulationConfig;
use crate::handler::UpdateValueHandler;

/// Responses to a batch of write requests
pub type WriteResponses = HashMap<AttRequest, AttResponseCode>;

// ----------------------------------------------------------------------------
// State
// ----------------------------------------------------------------------------

/// A write batch collecting one response per request
struct PendingWrite {
    requests: Vec<AttRequest>,
    responses: HashMap<Uuid, AttResponseCode>,
    reply: oneshot::Sender<Result<WriteResponses>>,
}

impl PendingWrite {
    fn contains(&self, request: &AttRequest) -> bool {
        self.requests.iter().any(|r| r.id == request.id)
    }

    fn is_answered(&self) -> bool {
        self.requests.iter().all(|r| self.responses.contains_key(&r.id))
    }

    fn finish(self) {
        let responses = self
            .requests
            .into_iter()
            .filter_map(|request| {
                let code = *self.responses.get(&request.id)?;
                Some((request, code))
            })
            .collect();
        let _ = self.reply.send(Ok(responses));
    }
}

#[derive(Default)]
struct ServerState {
    manager_state: ManagerState,
    authorization: Authorization,
    is_advertising: bool,
    advertisement_data: Option<AdvertisementData>,
    latencies: HashMap<Central, ConnectionLatency>,
    services: Vec<GattService>,
    next_psm: Psm,
    /// Published channels and whether they require encryption
    channels: HashMap<Psm, bool>,
    pending_reads: HashMap<Uuid, oneshot::Sender<Result<(AttRequest, AttResponseCode)>>>,
    pending_writes: HashMap<Uuid, PendingWrite>,
    subscriptions: HashMap<Central, HashSet<Characteristic>>,

    start_advertising_error: Option<BleError>,
    add_service_error: Option<BleError>,
    publish_channel_error: Option<BleError>,
    unpublish_channel_error: Option<BleError>,
}

impl ServerState {
    /// Forget everything tied to the previous power state
    fn reset(&mut self) {
        self.is_advertising = false;
        self.advertisement_data = None;
        self.latencies.clear();
        self.services.clear();
        self.channels.clear();
        for (_, reply) in self.pending_reads.drain() {
            let _ = reply.send(Err(BleError::PeripheralDisconnected));
        }
        for (_, pending) in self.pending_writes.drain() {
            let _ = pending.reply.send(Err(BleError::PeripheralDisconnected));
        }
        self.subscriptions.clear();
    }
}

// ----------------------------------------------------------------------------
// Simulated Peripheral Manager
// ----------------------------------------------------------------------------

/// A GATT server whose radio is simulated
pub struct SimulatedPeripheralManager {
    config: SimulationConfig,
    bus: ActionBus<PeripheralManagerEvent>,
    update_handler: Mutex<Option<Arc<dyn UpdateValueHandler>>>,
    state: Mutex<ServerState>,
    this: Weak<Self>,
}

impl SimulatedPeripheralManager {
    pub fn new() -> Arc<Self> {
        Self::with_config(SimulationConfig::default())
    }

    pub fn with_config(config: SimulationConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            bus: ActionBus::new(),
            update_handler: Mutex::new(None),
            state: Mutex::new(ServerState::default()),
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Change the power state.
    ///
    /// Any actual change drops advertising, services, channels, latencies and
    /// subscriptions, and fails pending requests with
    /// [`BleError::PeripheralDisconnected`].
    pub fn set_state(&self, new_state: ManagerState) {
        {
            let mut state = lock(&self.state);
            let old_state = std::mem::replace(&mut state.manager_state, new_state);
            if old_state != new_state {
                debug!(?old_state, ?new_state, "Peripheral manager state changed");
                state.reset();
            }
        }
        self.bus
            .publish(PeripheralManagerEvent::StateUpdated(new_state));
    }

    pub fn set_authorization(&self, authorization: Authorization) {
        lock(&self.state).authorization = authorization;
    }

    pub fn set_start_advertising_error(&self, error: Option<BleError>) {
        lock(&self.state).start_advertising_error = error;
    }

    pub fn set_add_service_error(&self, error: Option<BleError>) {
        lock(&self.state).add_service_error = error;
    }

    pub fn set_publish_channel_error(&self, error: Option<BleError>) {
        lock(&self.state).publish_channel_error = error;
    }

    pub fn set_unpublish_channel_error(&self, error: Option<BleError>) {
        lock(&self.state).unpublish_channel_error = error;
    }

    /// Decide whether updates are accepted; without a handler they all are
    pub fn set_update_value_handler(&self, handler: Option<Arc<dyn UpdateValueHandler>>) {
        *lock(&self.update_handler) = handler;
    }

    pub fn advertisement_data(&self) -> Option<AdvertisementData> {
        lock(&self.state).advertisement_data.clone()
    }

    /// Services added so far
    pub fn services(&self) -> Vec<GattService> {
        lock(&self.state).services.clone()
    }

    /// Published channels and whether each requires encryption
    pub fn published_channels(&self) -> HashMap<Psm, bool> {
        lock(&self.state).channels.clone()
    }

    pub fn latency(&self, central: &Central) -> Option<ConnectionLatency> {
        lock(&self.state).latencies.get(central).copied()
    }

    pub fn is_subscribed(&self, central: &Central, characteristic: &Characteristic) -> bool {
        lock(&self.state)
            .subscriptions
            .get(central)
            .map_or(false, |set| set.contains(characteristic))
    }

    /// Requests still waiting for a response
    pub fn pending_request_count(&self) -> usize {
        let state = lock(&self.state);
        state.pending_reads.len() + state.pending_writes.len()
    }

    // ------------------------------------------------------------------------
    // Remote Centrals
    // ------------------------------------------------------------------------

    /// Record a central (un)subscribing; events are only published when the
    /// subscription actually changes
    pub fn central_subscribed(&self, central: &Central, characteristic: &Characteristic, subscribed: bool) {
        self.check_state("central_subscribed");
        let changed = {
            let mut state = lock(&self.state);
            if subscribed {
                state
                    .subscriptions
                    .entry(central.clone())
                    .or_default()
                    .insert(characteristic.clone())
            } else {
                state
                    .subscriptions
                    .get_mut(central)
                    .map_or(false, |set| set.remove(characteristic))
            }
        };
        if !changed {
            return;
        }

        debug!(central = %central.id, characteristic = %characteristic.uuid, subscribed, "Subscription changed");
        let central = central.clone();
        let characteristic = characteristic.clone();
        self.bus.publish(if subscribed {
            PeripheralManagerEvent::CentralSubscribed {
                central,
                characteristic,
            }
        } else {
            PeripheralManagerEvent::CentralUnsubscribed {
                central,
                characteristic,
            }
        });
    }

    /// Deliver a read request and wait for the server to respond.
    ///
    /// Resolves to the responded request (its `value` carries the payload)
    /// and the response code.
    pub async fn perform_read_request(&self, request: AttRequest) -> Result<(AttRequest, AttResponseCode)> {
        self.check_state("perform_read_request");
        let (reply, answer) = oneshot::channel();
        let id = request.id;
        lock(&self.state).pending_reads.insert(id, reply);
        self.bus
            .publish(PeripheralManagerEvent::ReadRequestReceived(request));

        match tokio::time::timeout(self.config.request_timeout, answer).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => Err(BleError::PeripheralDisconnected),
            Err(_) => {
                warn!(request = %id, "Read request timed out");
                lock(&self.state).pending_reads.remove(&id);
                Err(BleError::RequestTimeout)
            }
        }
    }

    /// Deliver a batch of write requests and wait until every one of them
    /// has been responded to
    pub async fn perform_write_requests(&self, requests: Vec<AttRequest>) -> Result<WriteResponses> {
        self.check_state("perform_write_requests");
        if requests.is_empty() {
            return Ok(WriteResponses::new());
        }

        let (reply, answer) = oneshot::channel();
        let batch = Uuid::new_v4();
        lock(&self.state).pending_writes.insert(
            batch,
            PendingWrite {
                requests: requests.clone(),
                responses: HashMap::new(),
                reply,
            },
        );
        self.bus
            .publish(PeripheralManagerEvent::WriteRequestsReceived(requests));

        match tokio::time::timeout(self.config.request_timeout, answer).await {
            Ok(Ok(responses)) => responses,
            Ok(Err(_)) => Err(BleError::PeripheralDisconnected),
            Err(_) => {
                warn!(%batch, "Write requests timed out");
                lock(&self.state).pending_writes.remove(&batch);
                Err(BleError::RequestTimeout)
            }
        }
    }

    /// A central opens a published channel.
    ///
    /// Opening an unpublished PSM is ignored. Returns the central's end of
    /// the channel.
    pub fn open_l2cap_channel(&self, peer: Uuid, psm: Psm) -> Option<DuplexStream> {
        self.check_state("open_l2cap_channel");
        if !lock(&self.state).channels.contains_key(&psm) {
            debug!(psm, "Ignoring open of unpublished channel");
            return None;
        }

        let (local, remote) = tokio::io::duplex(self.config.channel_buffer_size);
        info!(%peer, psm, "Channel opened");
        self.bus.publish(PeripheralManagerEvent::ChannelOpened {
            channel: Some(L2capChannel::new(peer, psm, ChannelIo::new(local))),
            error: None,
        });
        Some(remote)
    }

    /// Report a failed channel open
    pub fn fail_l2cap_channel_open(&self, error: BleError) {
        self.check_state("fail_l2cap_channel_open");
        self.bus.publish(PeripheralManagerEvent::ChannelOpened {
            channel: None,
            error: Some(error),
        });
    }

    /// Signal that the transmit queue has room again
    pub fn notify_ready_to_update(&self) {
        self.bus
            .publish(PeripheralManagerEvent::ReadyToUpdateSubscribers);
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn check_state(&self, operation: &str) {
        let state = lock(&self.state);
        assert!(
            state.manager_state == ManagerState::PoweredOn
                && state.authorization == Authorization::AllowedAlways,
            "`{}` requires a powered on and authorized peripheral manager (state {:?}, authorization {:?})",
            operation,
            state.manager_state,
            state.authorization,
        );
    }

    /// Run `action` after the handling delay unless the manager is gone
    fn handle<F>(&self, action: F)
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        let this = self.this.clone();
        let delay = self.config.handling_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = this.upgrade() {
                action(&manager);
            }
        });
    }
}

// ----------------------------------------------------------------------------
// Backend
// ----------------------------------------------------------------------------

impl PeripheralManagerBackend for SimulatedPeripheralManager {
    fn bus(&self) -> &ActionBus<PeripheralManagerEvent> {
        &self.bus
    }

    fn state(&self) -> ManagerState {
        lock(&self.state).manager_state
    }

    fn authorization(&self) -> Authorization {
        lock(&self.state).authorization
    }

    fn is_advertising(&self) -> bool {
        lock(&self.state).is_advertising
    }

    fn start_advertising(&self, data: Option<AdvertisementData>) {
        self.check_state("start_advertising");
        self.handle(move |manager| {
            let error = {
                let mut state = lock(&manager.state);
                match state.start_advertising_error.clone() {
                    Some(error) => {
                        state.advertisement_data = None;
                        state.is_advertising = false;
                        Some(error)
                    }
                    None => {
                        state.advertisement_data = data;
                        state.is_advertising = true;
                        None
                    }
                }
            };
            info!(failed = error.is_some(), "Advertising start handled");
            manager
                .bus
                .publish(PeripheralManagerEvent::AdvertisingStarted { error });
        });
    }

    fn stop_advertising(&self) {
        if !lock(&self.state).is_advertising {
            return;
        }
        self.handle(|manager| {
            let mut state = lock(&manager.state);
            state.advertisement_data = None;
            state.is_advertising = false;
        });
    }

    fn set_desired_connection_latency(&self, latency: ConnectionLatency, central: &Central) {
        self.check_state("set_desired_connection_latency");
        lock(&self.state).latencies.insert(central.clone(), latency);
    }

    fn add_service(&self, service: &GattService) {
        self.check_state("add_service");
        let definition = service.clone();
        self.handle(move |manager| {
            let service = definition.handle(LOCAL_PERIPHERAL);
            let error = {
                let mut state = lock(&manager.state);
                match state.add_service_error.clone() {
                    Some(error) => Some(error),
                    None => {
                        state.services.push(definition);
                        None
                    }
                }
            };
            manager
                .bus
                .publish(PeripheralManagerEvent::ServiceAdded { service, error });
        });
    }

    fn remove_service(&self, service: &Service) {
        self.check_state("remove_service");
        lock(&self.state).services.retain(|s| s.uuid != service.uuid);
    }

    fn remove_all_services(&self) {
        self.check_state("remove_all_services");
        lock(&self.state).services.clear();
    }

    fn respond(&self, request: &AttRequest, result: AttResponseCode) {
        self.check_state("respond");
        let mut state = lock(&self.state);

        if let Some(reply) = state.pending_reads.remove(&request.id) {
            let _ = reply.send(Ok((request.clone(), result)));
            return;
        }

        let batch = state
            .pending_writes
            .iter()
            .find(|(_, pending)| pending.contains(request))
            .map(|(batch, _)| *batch);
        let Some(batch) = batch else {
            debug!(request = %request.id, "Response to unknown request ignored");
            return;
        };
        let answered = state.pending_writes.get_mut(&batch).map_or(false, |pending| {
            pending.responses.insert(request.id, result);
            pending.is_answered()
        });
        if answered {
            if let Some(pending) = state.pending_writes.remove(&batch) {
                pending.finish();
            }
        }
    }

    fn update_value(
        &self,
        value: &[u8],
        characteristic: &Characteristic,
        centrals: Option<&[Central]>,
    ) -> bool {
        self.check_state("update_value");
        let handler = lock(&self.update_handler).clone();
        handler.map_or(true, |handler| {
            handler.update_value(value, characteristic, centrals)
        })
    }

    fn publish_l2cap_channel(&self, encryption_required: bool) {
        self.check_state("publish_l2cap_channel");
        self.handle(move |manager| {
            let (psm, error) = {
                let mut state = lock(&manager.state);
                let psm = state.next_psm;
                state.next_psm = psm.wrapping_add(1);
                match state.publish_channel_error.clone() {
                    Some(error) => (psm, Some(error)),
                    None => {
                        state.channels.insert(psm, encryption_required);
                        (psm, None)
                    }
                }
            };
            info!(psm, failed = error.is_some(), "Channel publish handled");
            manager
                .bus
                .publish(PeripheralManagerEvent::ChannelPublished { psm, error });
        });
    }

    fn unpublish_l2cap_channel(&self, psm: Psm) {
        self.check_state("unpublish_l2cap_channel");
        self.handle(move |manager| {
            let error = {
                let mut state = lock(&manager.state);
                match state.unpublish_channel_error.clone() {
                    Some(error) => Some(error),
                    None => {
                        state.channels.remove(&psm);
                        None
                    }
                }
            };
            manager
                .bus
                .publish(PeripheralManagerEvent::ChannelUnpublished { psm, error });
        });
    }
}

impl std::fmt::Debug for SimulatedPeripheralManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("SimulatedPeripheralManager")
            .field("state", &state.manager_state)
            .field("authorization", &state.authorization)
            .field("advertising", &state.is_advertising)
            .field("services", &state.services.len())
            .finish()
    }
}
