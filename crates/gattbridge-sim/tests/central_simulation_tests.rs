//! Tests for the simulated central role
//!
//! Drives [`SimulatedCentralManager`] through the `CentralManager` facade:
//! advertisement filtering, authorization, connection lifecycle and
//! connection event fan-out.


use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use gattbridge_core::*;
use gattbridge_sim::*;
use test_utils::*;

// ----------------------------------------------------------------------------
// Scanning Tests
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_scan_reports_discoverable_peripherals_once() {
    init_tracing();
    let (simulation, manager) = powered_central();
    let visible = wearable(&simulation, false);
    let hidden = wearable(&simulation, false);
    hidden.set_discoverable(false);

    let scan = manager.scan_for_peripherals(None, ScanOptions::new());
    let mut discoveries = scan.subscribe();
    assert!(manager.is_scanning());

    let discovery = discoveries.next().await.unwrap();
    assert_eq!(discovery.peripheral.id(), visible.id());
    let rssi = discovery.rssi.unwrap();
    assert!((-100.0..=0.0).contains(&rssi));

    // Duplicates are filtered and the hidden wearable never shows up
    let more = tokio::time::timeout(Duration::from_secs(5), discoveries.next()).await;
    assert!(more.is_err());

    drop(discoveries);
    assert!(!manager.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_scan_with_duplicates_repeats_packets() {
    let (simulation, manager) = powered_central();
    let peripheral = wearable(&simulation, false);
    peripheral.set_advertiser(Some(
        Advertiser::new(
            Duration::from_millis(100),
            AdvertisementData::new().with_local_name("band"),
        )
        .with_rssi_generator(|event| -(event as f64)),
    ));

    let scan = manager.scan_for_peripherals(None, ScanOptions::new().with_allow_duplicates(true));
    let mut discoveries = scan.subscribe();

    let rssis: Vec<f64> = (&mut discoveries)
        .take(3)
        .map(|discovery| discovery.rssi.unwrap())
        .collect()
        .await;
    assert_eq!(rssis, vec![-1.0, -2.0, -3.0]);
}

#[tokio::test(start_paused = true)]
async fn test_scan_filters_by_declared_services() {
    let (simulation, manager) = powered_central();
    let matching = wearable(&simulation, false);
    let other = SimulatedPeripheral::new(Some("beacon"));
    simulation.add_peripheral(&other, false);

    let scan = manager.scan_for_peripherals(Some(vec![HEART_RATE_SERVICE]), ScanOptions::new());
    let mut discoveries = scan.subscribe();

    let discovery = discoveries.next().await.unwrap();
    assert_eq!(discovery.peripheral.id(), matching.id());
    let more = tokio::time::timeout(Duration::from_secs(5), discoveries.next()).await;
    assert!(more.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_silenced_advertiser_stops_discovery() {
    let (simulation, manager) = powered_central();
    let peripheral = wearable(&simulation, false);
    peripheral.set_advertiser(None);

    let scan = manager.scan_for_peripherals(None, ScanOptions::new());
    let mut discoveries = scan.subscribe();
    let silent = tokio::time::timeout(Duration::from_secs(5), discoveries.next()).await;
    assert!(silent.is_err());

    peripheral.set_advertiser(Some(basic_advertiser()));
    let discovery = discoveries.next().await.unwrap();
    assert_eq!(discovery.peripheral.id(), peripheral.id());
}

// ----------------------------------------------------------------------------
// Authorization Tests
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_undetermined_authorization_prompts_before_scanning() {
    let simulation = SimulatedCentralManager::new();
    simulation.set_state(ManagerState::PoweredOn);
    let manager = CentralManager::new(simulation.clone());
    wearable(&simulation, false);
    assert_eq!(manager.authorization(), Authorization::NotDetermined);

    let scan = manager.scan_for_peripherals(None, ScanOptions::new());
    let mut discoveries = scan.subscribe();

    assert!(discoveries.next().await.is_some());
    assert_eq!(manager.authorization(), Authorization::AllowedAlways);
}

#[tokio::test(start_paused = true)]
async fn test_scan_stopped_during_prompt_never_starts() {
    let simulation = SimulatedCentralManager::new();
    simulation.set_state(ManagerState::PoweredOn);
    let manager = CentralManager::new(simulation.clone());
    wearable(&simulation, false);

    let scan = manager.scan_for_peripherals(None, ScanOptions::new());
    let discoveries = scan.subscribe();
    drop(discoveries);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(manager.authorization(), Authorization::AllowedAlways);
    assert!(!manager.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_denied_prompt_refuses_scan() {
    let simulation = SimulatedCentralManager::new();
    simulation.set_state(ManagerState::PoweredOn);
    let authorizer = FixedAuthorizer::new(Authorization::Denied);
    simulation.set_authorizer(authorizer.clone());
    let manager = CentralManager::new(simulation.clone());
    wearable(&simulation, false);

    let scan = manager.scan_for_peripherals(None, ScanOptions::new());
    let mut discoveries = scan.subscribe();
    let nothing = tokio::time::timeout(Duration::from_secs(5), discoveries.next()).await;

    assert!(nothing.is_err());
    assert!(!manager.is_scanning());
    assert_eq!(manager.authorization(), Authorization::Denied);
    assert_eq!(authorizer.refusals(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restricted_authorization_never_prompts() {
    let (simulation, manager) = powered_central();
    simulation.set_authorization(Authorization::Restricted);
    let authorizer = FixedAuthorizer::new(Authorization::AllowedAlways);
    simulation.set_authorizer(authorizer.clone());

    let scan = manager.scan_for_peripherals(None, ScanOptions::new());
    let _discoveries = scan.subscribe();

    assert!(!manager.is_scanning());
    assert_eq!(manager.authorization(), Authorization::Restricted);
    assert_eq!(authorizer.refusals(), 1);
}

// ----------------------------------------------------------------------------
// Connection Tests
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_unknown_peripheral_cannot_connect_until_discovered() {
    init_tracing();
    let (simulation, manager) = powered_central();
    let simulated = wearable(&simulation, false);
    assert!(manager.retrieve_peripherals(&[simulated.id()]).is_empty());

    let refused = manager
        .connect(&simulated.facade(), ConnectionOptions::default())
        .await;
    assert_eq!(refused.unwrap_err(), BleError::UnknownDevice);

    let scan = manager.scan_for_peripherals(None, ScanOptions::new());
    let discovery = scan.subscribe().next().await.unwrap();
    assert!(!manager.is_scanning());

    let peripheral = manager
        .connect(&discovery.peripheral, ConnectionOptions::default())
        .await
        .unwrap();
    assert_eq!(peripheral.id(), simulated.id());
    assert_eq!(peripheral.state(), PeripheralState::Connected);
    assert!(simulation.is_connected(simulated.id()));
    assert_eq!(manager.retrieve_peripherals(&[simulated.id()]).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_not_connectable_peripheral_fails() {
    let (simulation, manager) = powered_central();
    let simulated = wearable(&simulation, true);
    simulated.set_connectable(false);

    let result = manager
        .connect(&simulated.facade(), ConnectionOptions::default())
        .await;
    assert_eq!(result.unwrap_err(), BleError::ConnectionFailed);
    assert_eq!(simulated.facade().state(), PeripheralState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_retrieve_connected_filters_by_service() {
    let (simulation, manager, simulated, _peripheral) = connected_wearable().await;

    let connected = manager.retrieve_connected_peripherals(&[BATTERY_SERVICE]);
    assert_eq!(connected.len(), 1);
    assert_eq!(connected[0].id(), simulated.id());
    assert!(manager
        .retrieve_connected_peripherals(&[uuid::Uuid::new_v4()])
        .is_empty());
    assert!(simulation.is_connected(simulated.id()));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_connect_disconnects() {
    let (simulation, manager) = powered_central();
    let simulated = wearable(&simulation, true);
    let facade = simulated.facade();
    let mut monitor = manager.monitor_connection(&facade);

    let mut connect = manager.connect(&facade, ConnectionOptions::default());
    let pending = tokio::time::timeout(Duration::from_millis(10), &mut connect).await;
    assert!(pending.is_err());
    assert_eq!(facade.state(), PeripheralState::Connecting);

    drop(connect);
    assert_eq!(facade.state(), PeripheralState::Disconnecting);

    assert_eq!(monitor.next().await, Some(Ok(false)));
    assert_eq!(facade.state(), PeripheralState::Disconnected);
    assert!(!simulation.is_connected(simulated.id()));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_reports_through_monitor() {
    let (simulation, manager, simulated, peripheral) = connected_wearable().await;
    let mut monitor = manager.monitor_connection(&peripheral);

    manager.cancel_peripheral_connection(&peripheral);
    assert_eq!(monitor.next().await, Some(Ok(false)));
    assert!(!simulation.is_connected(simulated.id()));

    let again = manager
        .connect(&peripheral, ConnectionOptions::default())
        .await
        .unwrap();
    assert_eq!(again.state(), PeripheralState::Connected);
    assert_eq!(monitor.next().await, Some(Ok(true)));
}

// ----------------------------------------------------------------------------
// Connection Event Tests
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_connection_events_follow_registration() {
    let (simulation, manager) = powered_central();
    let registered = wearable(&simulation, true);
    let unregistered = SimulatedPeripheral::new(None);
    simulation.add_peripheral(&unregistered, true);

    manager.register_for_connection_events(Some(ConnectionEventMatchingOptions::peripherals(
        vec![registered.id()],
    )));
    let mut events = manager.connection_events();

    manager
        .connect(&unregistered.facade(), ConnectionOptions::default())
        .await
        .unwrap();
    let peripheral = manager
        .connect(&registered.facade(), ConnectionOptions::default())
        .await
        .unwrap();

    let (event, reported) = events.next().await.unwrap().unwrap();
    assert_eq!(event, ConnectionEvent::PeerConnected);
    assert_eq!(reported.id(), registered.id());

    manager.cancel_peripheral_connection(&peripheral);
    let (event, reported) = events.next().await.unwrap().unwrap();
    assert_eq!(event, ConnectionEvent::PeerDisconnected);
    assert_eq!(reported.id(), registered.id());
}

#[tokio::test(start_paused = true)]
async fn test_connection_events_match_declared_services() {
    let (simulation, manager) = powered_central();
    let simulated = wearable(&simulation, true);
    manager.register_for_connection_events(Some(ConnectionEventMatchingOptions::services(vec![
        HEART_RATE_SERVICE,
    ])));
    let mut events = manager.connection_events();

    manager
        .connect(&simulated.facade(), ConnectionOptions::default())
        .await
        .unwrap();
    let (event, _) = events.next().await.unwrap().unwrap();
    assert_eq!(event, ConnectionEvent::PeerConnected);

    manager.register_for_connection_events(None);
    manager.cancel_peripheral_connection(&simulated.facade());
    let silent = tokio::time::timeout(Duration::from_secs(5), events.next()).await;
    assert!(silent.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_simulation_stops_advertising_tasks() {
    let (simulation, manager) = powered_central();
    let peripheral = wearable(&simulation, false);
    let weak = Arc::downgrade(&simulation);
    drop(manager);
    drop(simulation);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(weak.upgrade().is_none());
    assert_eq!(Arc::strong_count(&peripheral), 1);
}
