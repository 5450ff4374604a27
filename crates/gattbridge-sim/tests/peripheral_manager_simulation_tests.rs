//! Tests for the simulated GATT server
//!
//! Simulated centrals subscribe, read, write and open channels against a
//! [`SimulatedPeripheralManager`] while the `PeripheralManager` facade
//! answers them.


use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use gattbridge_core::*;
use gattbridge_sim::*;
use test_utils::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn battery_level() -> Characteristic {
    Characteristic::local(
        BATTERY_LEVEL,
        BATTERY_SERVICE,
        vec![CharacteristicProperty::Read, CharacteristicProperty::Notify],
    )
}

fn battery_service() -> GattService {
    wearable_database().remove(0)
}

// ----------------------------------------------------------------------------
// Advertising and Service Tests
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_advertising_lifecycle() {
    init_tracing();
    let (simulation, manager) = powered_server();
    let data = AdvertisementData::new().with_local_name("server");

    manager.start_advertising(Some(data.clone())).await.unwrap();
    assert!(manager.is_advertising());
    assert_eq!(simulation.advertisement_data(), Some(data));

    manager.stop_advertising();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!manager.is_advertising());
    assert_eq!(simulation.advertisement_data(), None);
}

#[tokio::test(start_paused = true)]
async fn test_advertising_error_is_injected() {
    let (simulation, manager) = powered_server();
    simulation.set_start_advertising_error(Some(BleError::Platform("busy".into())));

    let result = manager.start_advertising(None).await;
    assert_eq!(result, Err(BleError::Platform("busy".into())));
    assert!(!manager.is_advertising());
}

#[tokio::test(start_paused = true)]
async fn test_add_service_returns_local_handle() {
    let (simulation, manager) = powered_server();

    let service = manager.add_service(&battery_service()).await.unwrap();
    assert_eq!(service.uuid, BATTERY_SERVICE);
    assert_eq!(service.peripheral, LOCAL_PERIPHERAL);
    assert_eq!(simulation.services().len(), 1);

    simulation.set_add_service_error(Some(BleError::Platform("full".into())));
    let refused = manager.add_service(&wearable_database().remove(1)).await;
    assert_eq!(refused.unwrap_err(), BleError::Platform("full".into()));
    assert_eq!(simulation.services().len(), 1);

    manager.remove_service(&service);
    assert!(simulation.services().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_power_cycle_resets_server() {
    let (simulation, manager) = powered_server();
    let central = SimulatedCentral::new();
    manager.add_service(&battery_service()).await.unwrap();
    manager.start_advertising(None).await.unwrap();
    manager.set_desired_connection_latency(ConnectionLatency::Low, &central.central());
    assert_eq!(
        simulation.latency(&central.central()),
        Some(ConnectionLatency::Low)
    );

    let mut states = manager.state_updates();
    simulation.set_state(ManagerState::PoweredOff);
    assert_eq!(states.next().await, Some(Ok(ManagerState::PoweredOff)));

    assert!(!manager.is_advertising());
    assert!(simulation.services().is_empty());
    assert_eq!(simulation.latency(&central.central()), None);
}

// ----------------------------------------------------------------------------
// ATT Request Tests
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_read_request_is_answered() {
    let (simulation, manager) = powered_server();
    let central = SimulatedCentral::new();
    let mut reads = manager.read_requests();

    let server = simulation.clone();
    let request = central.read_request(&battery_level(), 0);
    let read = tokio::spawn(async move { server.perform_read_request(request).await });

    let received = reads.next().await.unwrap().unwrap();
    assert_eq!(received.central, central.central());
    manager.respond(&received.clone().respond_with(vec![64]), AttResponseCode::Success);

    let (answered, code) = read.await.unwrap().unwrap();
    assert_eq!(code, AttResponseCode::Success);
    assert_eq!(answered.value, Some(vec![64]));
    assert_eq!(simulation.pending_request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_read_times_out() {
    let (simulation, _manager) = powered_server();
    let central = SimulatedCentral::new();

    let result = simulation
        .perform_read_request(central.read_request(&battery_level(), 0))
        .await;
    assert_eq!(result.unwrap_err(), BleError::RequestTimeout);
    assert_eq!(simulation.pending_request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_write_batch_waits_for_every_response() {
    let (simulation, manager) = powered_server();
    let central = SimulatedCentral::new();
    let mut writes = manager.write_requests();

    let requests = vec![
        central.write_request(&battery_level(), vec![1]),
        central.write_request(&battery_level(), vec![2]),
    ];
    let server = simulation.clone();
    let batch = tokio::spawn(async move { server.perform_write_requests(requests).await });

    let received = writes.next().await.unwrap().unwrap();
    assert_eq!(received.len(), 2);

    manager.respond(&received[0], AttResponseCode::Success);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!batch.is_finished());
    assert_eq!(simulation.pending_request_count(), 1);

    manager.respond(&received[1], AttResponseCode::InvalidOffset);
    let responses = batch.await.unwrap().unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[&received[0]], AttResponseCode::Success);
    assert_eq!(responses[&received[1]], AttResponseCode::InvalidOffset);
}

#[tokio::test(start_paused = true)]
async fn test_empty_write_batch_resolves_immediately() {
    let (simulation, _manager) = powered_server();
    let responses = simulation.perform_write_requests(Vec::new()).await.unwrap();
    assert!(responses.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_power_off_fails_pending_requests() {
    let (simulation, manager) = powered_server();
    let central = SimulatedCentral::new();
    let mut reads = manager.read_requests();

    let server = simulation.clone();
    let request = central.read_request(&battery_level(), 0);
    let read = tokio::spawn(async move { server.perform_read_request(request).await });
    reads.next().await.unwrap().unwrap();

    simulation.set_state(ManagerState::Resetting);
    assert_eq!(read.await.unwrap().unwrap_err(), BleError::PeripheralDisconnected);
}

// ----------------------------------------------------------------------------
// Subscription Tests
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_subscriptions_report_changes_only() {
    let (simulation, manager) = powered_server();
    let central = SimulatedCentral::new().central();
    let characteristic = battery_level();
    let mut updates = manager.subscription_updates();

    simulation.central_subscribed(&central, &characteristic, true);
    simulation.central_subscribed(&central, &characteristic, true);
    simulation.central_subscribed(&central, &characteristic, false);
    simulation.central_subscribed(&central, &characteristic, false);

    let (who, what, subscribed) = updates.next().await.unwrap().unwrap();
    assert_eq!((who, what, subscribed), (central.clone(), characteristic.clone(), true));
    let (_, _, subscribed) = updates.next().await.unwrap().unwrap();
    assert!(!subscribed);

    let repeated = tokio::time::timeout(Duration::from_secs(1), updates.next()).await;
    assert!(repeated.is_err());
    assert!(!simulation.is_subscribed(&central, &characteristic));
}

#[tokio::test(start_paused = true)]
async fn test_update_retries_until_queue_drains() {
    let (simulation, manager) = powered_server();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let handler = move |_: &[u8], _: &Characteristic, _: Option<&[Central]>| {
        counter.fetch_add(1, Ordering::SeqCst) + 1 >= 3
    };
    simulation.set_update_value_handler(Some(Arc::new(handler)));

    let update = manager.update_value(vec![90], &battery_level(), None);
    simulation.notify_ready_to_update();
    simulation.notify_ready_to_update();

    assert_eq!(update.await, Ok(()));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_update_without_handler_is_accepted() {
    let (_simulation, manager) = powered_server();
    let centrals = vec![SimulatedCentral::new().central()];
    assert_eq!(
        manager
            .update_value(vec![1], &battery_level(), Some(centrals))
            .await,
        Ok(())
    );
}

// ----------------------------------------------------------------------------
// L2CAP Channel Tests
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_published_channel_accepts_centrals() {
    let (simulation, manager) = powered_server();
    let peer = SimulatedCentral::new().id();

    let first = manager.publish_l2cap_channel(true).await.unwrap();
    let second = manager.publish_l2cap_channel(false).await.unwrap();
    assert_eq!((first, second), (0, 1));
    assert_eq!(simulation.published_channels().get(&first), Some(&true));

    let mut opened = manager.opened_channels();
    let mut remote = simulation.open_l2cap_channel(peer, first).unwrap();
    let channel = opened.next().await.unwrap().unwrap();
    assert_eq!((channel.peer, channel.psm), (peer, first));

    let mut local = channel.io.take().unwrap();
    remote.write_all(b"hello").await.unwrap();
    let mut received = [0u8; 5];
    local.read_exact(&mut received).await.unwrap();
    assert_eq!(&received, b"hello");

    assert_eq!(manager.unpublish_l2cap_channel(first).await, Ok(first));
    assert!(simulation.open_l2cap_channel(peer, first).is_none());
    assert!(simulation.open_l2cap_channel(peer, 77).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_channel_errors_are_injected() {
    let (simulation, manager) = powered_server();
    simulation.set_publish_channel_error(Some(BleError::Platform("no psm".into())));
    assert_eq!(
        manager.publish_l2cap_channel(false).await,
        Err(BleError::Platform("no psm".into()))
    );
    assert!(simulation.published_channels().is_empty());

    let mut opened = manager.opened_channels();
    simulation.fail_l2cap_channel_open(BleError::PeripheralDisconnected);
    assert_eq!(opened.next().await, Some(Err(BleError::PeripheralDisconnected)));
    assert!(opened.next().await.is_none());
}

#[test]
#[should_panic(expected = "requires a powered on and authorized peripheral manager")]
fn test_unpowered_server_rejects_remote_operations() {
    let simulation = SimulatedPeripheralManager::new();
    simulation.central_subscribed(
        &SimulatedCentral::new().central(),
        &battery_level(),
        true,
    );
}
