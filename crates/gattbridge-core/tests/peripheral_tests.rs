//! Tests for correlated peripheral operations
//!
//! These verify discovery completion, value reads and writes, and the
//! notification subscription lifecycle against a scripted peripheral.


use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use gattbridge_core::*;
use test_utils::*;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Discovery Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_discovery_waits_for_superset() {
    init_tracing();
    let owner = Uuid::new_v4();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let backend = ScriptedPeripheral::new(move |command, bus| {
        if let Command::DiscoverServices(_) = command {
            bus.publish(PeripheralEvent::ServicesDiscovered {
                services: vec![Service::new(c, owner, true)],
                error: None,
            });
            bus.publish(PeripheralEvent::ServicesDiscovered {
                services: vec![Service::new(a, owner, true), Service::new(b, owner, true)],
                error: None,
            });
        }
    });
    let peripheral = backend.facade();

    let services = peripheral.discover_services(Some(vec![a, b])).await.unwrap();
    let ids: Vec<Uuid> = services.iter().map(|s| s.uuid).collect();
    assert_eq!(ids, vec![a, b]);
    assert_eq!(
        backend.commands(),
        vec![Command::DiscoverServices(Some(vec![a, b]))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_discovery_never_completes_without_requested_ids() {
    let owner = Uuid::new_v4();
    let backend = ScriptedPeripheral::new(move |command, bus| {
        if let Command::DiscoverServices(_) = command {
            bus.publish(PeripheralEvent::ServicesDiscovered {
                services: vec![Service::new(Uuid::new_v4(), owner, true)],
                error: None,
            });
        }
    });
    let peripheral = backend.facade();

    let result = tokio::time::timeout(
        Duration::from_secs(60),
        peripheral.discover_services(Some(vec![Uuid::new_v4()])),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_discover_all_completes_on_first_report() {
    let owner = Uuid::new_v4();
    let first = Service::new(Uuid::new_v4(), owner, true);
    let reported = first.clone();
    let backend = ScriptedPeripheral::new(move |command, bus| {
        if let Command::DiscoverServices(None) = command {
            bus.publish(PeripheralEvent::ServicesDiscovered {
                services: vec![reported.clone()],
                error: None,
            });
        }
    });

    let services = backend.facade().discover_services(None).await.unwrap();
    assert_eq!(services, vec![first]);
}

#[tokio::test]
async fn test_discovery_error_fails_request() {
    let backend = ScriptedPeripheral::new(|command, bus| {
        if let Command::DiscoverServices(_) = command {
            bus.publish(PeripheralEvent::ServicesDiscovered {
                services: Vec::new(),
                error: Some(BleError::PeripheralDisconnected),
            });
        }
    });

    let result = backend
        .facade()
        .discover_services(Some(vec![Uuid::new_v4()]))
        .await;
    assert_eq!(result, Err(BleError::PeripheralDisconnected));
}

#[tokio::test]
async fn test_characteristic_discovery_ignores_other_services() {
    let backend = ScriptedPeripheral::silent();
    let peripheral = backend.facade();
    let wanted = service_on(&peripheral);
    let other = service_on(&peripheral);
    let id = Uuid::new_v4();

    let request = peripheral.discover_characteristics(Some(vec![id]), &wanted);
    assert!(request.clone().now_or_never().is_none());

    backend.publish(PeripheralEvent::CharacteristicsDiscovered {
        service: other.clone(),
        characteristics: vec![Characteristic::new(id, &other, vec![])],
        error: None,
    });
    backend.publish(PeripheralEvent::CharacteristicsDiscovered {
        service: wanted.clone(),
        characteristics: vec![Characteristic::new(id, &wanted, vec![])],
        error: None,
    });

    let found = request.await.unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].is_in(&wanted));
}

#[tokio::test(start_paused = true)]
async fn test_convenience_lookup_waits_for_missing_characteristic() {
    let owner = Arc::new(Mutex::new(Uuid::nil()));
    let script_owner = Arc::clone(&owner);
    let backend = ScriptedPeripheral::new(move |command, bus| match command {
        Command::DiscoverServices(Some(ids)) => {
            let owner = *script_owner.lock().unwrap();
            bus.publish(PeripheralEvent::ServicesDiscovered {
                services: ids.iter().map(|id| Service::new(*id, owner, true)).collect(),
                error: None,
            });
        }
        Command::DiscoverCharacteristics(_, service) => {
            bus.publish(PeripheralEvent::CharacteristicsDiscovered {
                service: service.clone(),
                characteristics: Vec::new(),
                error: None,
            });
        }
        _ => {}
    });
    let peripheral = backend.facade();
    *owner.lock().unwrap() = peripheral.id();

    let missing = Uuid::new_v4();
    let result = tokio::time::timeout(
        Duration::from_secs(1),
        peripheral.discover_characteristic(missing, Uuid::new_v4()),
    )
    .await;

    // An empty characteristic list never satisfies a request for `missing`
    assert!(result.is_err());
    assert_eq!(backend.commands().len(), 2);
}

#[tokio::test]
async fn test_discover_descriptor_not_found() {
    let backend = ScriptedPeripheral::new(|command, bus| {
        if let Command::DiscoverDescriptors(characteristic) = command {
            bus.publish(PeripheralEvent::DescriptorsDiscovered {
                characteristic: characteristic.clone(),
                descriptors: Vec::new(),
                error: None,
            });
        }
    });
    let peripheral = backend.facade();
    let characteristic = characteristic_in(&service_on(&peripheral), vec![]);
    let descriptor = Uuid::new_v4();

    let result = peripheral.discover_descriptor(descriptor, &characteristic).await;
    assert_eq!(
        result,
        Err(BleError::DescriptorNotFound {
            descriptor,
            characteristic: characteristic.uuid,
        })
    );
}

// ----------------------------------------------------------------------------
// Read/Write Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_read_value_returns_characteristic_value() {
    let backend = ScriptedPeripheral::new(|command, bus| {
        if let Command::ReadValue(characteristic) = command {
            bus.publish(PeripheralEvent::CharacteristicValueUpdated {
                characteristic: characteristic.clone().with_value(Some(vec![1, 2, 3])),
                error: None,
            });
        }
    });
    let peripheral = backend.facade();
    let characteristic = characteristic_in(&service_on(&peripheral), vec![CharacteristicProperty::Read]);

    assert_eq!(
        peripheral.read_value(&characteristic).await,
        Ok(Some(vec![1, 2, 3]))
    );
}

#[tokio::test]
async fn test_write_with_response_surfaces_att_error() {
    let backend = ScriptedPeripheral::new(|command, bus| {
        if let Command::WriteValue(_, characteristic, WriteType::WithResponse) = command {
            bus.publish(PeripheralEvent::CharacteristicWritten {
                characteristic: characteristic.clone(),
                error: Some(AttResponseCode::WriteNotPermitted.into()),
            });
        }
    });
    let peripheral = backend.facade();
    let characteristic = characteristic_in(&service_on(&peripheral), vec![CharacteristicProperty::Write]);

    let result = peripheral
        .write_value(vec![9], &characteristic, WriteType::WithResponse)
        .await;
    assert_eq!(result, Err(BleError::Att(AttResponseCode::WriteNotPermitted)));
}

#[tokio::test]
async fn test_write_without_response_requires_capability() {
    let backend = ScriptedPeripheral::silent();
    let peripheral = backend.facade();
    let service = service_on(&peripheral);
    let plain = characteristic_in(&service, vec![CharacteristicProperty::Write]);
    let capable = characteristic_in(&service, vec![CharacteristicProperty::WriteWithoutResponse]);

    let refused = peripheral.write_value(vec![1], &plain, WriteType::WithoutResponse);
    assert_eq!(
        refused.peek(),
        Some(Err(BleError::WriteNotPermitted {
            characteristic: plain.uuid
        }))
    );
    assert!(backend.commands().is_empty());

    let sent = peripheral.write_value(vec![2], &capable, WriteType::WithoutResponse);
    assert_eq!(sent.await, Ok(()));
    assert_eq!(
        backend.commands(),
        vec![Command::WriteValue(vec![2], capable, WriteType::WithoutResponse)]
    );
}

#[tokio::test]
async fn test_read_rssi() {
    let backend = ScriptedPeripheral::new(|command, bus| {
        if *command == Command::ReadRssi {
            bus.publish(PeripheralEvent::RssiRead {
                rssi: -63.0,
                error: None,
            });
        }
    });

    assert_eq!(backend.facade().read_rssi().await, Ok(-63.0));
}

#[tokio::test]
async fn test_open_channel_matches_psm() {
    let backend = ScriptedPeripheral::silent();
    let peripheral = backend.facade();
    let request = peripheral.open_l2cap_channel(0x81);
    assert!(request.clone().now_or_never().is_none());

    let (local, _remote) = tokio::io::duplex(64);
    backend.publish(PeripheralEvent::ChannelOpened {
        channel: Some(L2capChannel::new(peripheral.id(), 0x80, ChannelIo::default())),
        error: None,
    });
    backend.publish(PeripheralEvent::ChannelOpened {
        channel: Some(L2capChannel::new(peripheral.id(), 0x81, ChannelIo::new(local))),
        error: None,
    });

    let channel = request.await.unwrap();
    assert_eq!(channel.psm, 0x81);
    assert!(channel.io.take().is_some());
    assert_eq!(backend.commands(), vec![Command::OpenChannel(0x81)]);
}

// ----------------------------------------------------------------------------
// Notification Tests
// ----------------------------------------------------------------------------

fn confirming_peripheral() -> Arc<ScriptedPeripheral> {
    ScriptedPeripheral::new(|command, bus| {
        if let Command::SetNotify(enabled, characteristic) = command {
            bus.publish(PeripheralEvent::NotificationStateUpdated {
                characteristic: characteristic.clone(),
                is_notifying: *enabled,
                error: None,
            });
        }
    })
}

#[tokio::test]
async fn test_subscribe_enables_then_disables_notifications() {
    init_tracing();
    let backend = confirming_peripheral();
    let peripheral = backend.facade();
    let characteristic = characteristic_in(&service_on(&peripheral), vec![CharacteristicProperty::Notify]);

    let mut updates = peripheral.subscribe_to_updates(&characteristic);
    assert!(backend.commands().is_empty());
    assert!(updates.next().now_or_never().is_none());
    assert_eq!(
        backend.commands(),
        vec![Command::SetNotify(true, characteristic.clone())]
    );

    backend.publish(PeripheralEvent::CharacteristicValueUpdated {
        characteristic: characteristic.clone().with_value(Some(vec![7])),
        error: None,
    });
    assert_eq!(updates.next().await, Some(Ok(Some(vec![7]))));

    drop(updates);
    assert_eq!(
        backend.commands(),
        vec![
            Command::SetNotify(true, characteristic.clone()),
            Command::SetNotify(false, characteristic),
        ]
    );
}

#[tokio::test]
async fn test_values_before_confirmation_are_not_forwarded() {
    let backend = ScriptedPeripheral::silent();
    let peripheral = backend.facade();
    let characteristic = characteristic_in(&service_on(&peripheral), vec![CharacteristicProperty::Notify]);

    let mut updates = peripheral.subscribe_to_updates(&characteristic);
    assert!(updates.next().now_or_never().is_none());

    backend.publish(PeripheralEvent::CharacteristicValueUpdated {
        characteristic: characteristic.clone().with_value(Some(vec![1])),
        error: None,
    });
    backend.publish(PeripheralEvent::NotificationStateUpdated {
        characteristic: characteristic.clone(),
        is_notifying: true,
        error: None,
    });
    backend.publish(PeripheralEvent::CharacteristicValueUpdated {
        characteristic: characteristic.clone().with_value(Some(vec![2])),
        error: None,
    });

    assert_eq!(updates.next().await, Some(Ok(Some(vec![2]))));
}

#[tokio::test]
async fn test_failed_subscription_emits_no_values() {
    let backend = ScriptedPeripheral::new(|command, bus| {
        if let Command::SetNotify(true, characteristic) = command {
            bus.publish(PeripheralEvent::NotificationStateUpdated {
                characteristic: characteristic.clone(),
                is_notifying: false,
                error: Some(AttResponseCode::InsufficientAuthentication.into()),
            });
            bus.publish(PeripheralEvent::CharacteristicValueUpdated {
                characteristic: characteristic.clone().with_value(Some(vec![1])),
                error: None,
            });
        }
    });
    let peripheral = backend.facade();
    let characteristic = characteristic_in(&service_on(&peripheral), vec![CharacteristicProperty::Notify]);

    let mut updates = peripheral.subscribe_to_updates(&characteristic);
    assert_eq!(
        updates.next().await,
        Some(Err(BleError::Att(AttResponseCode::InsufficientAuthentication)))
    );
    assert_eq!(updates.next().await, None);

    drop(updates);
    assert_eq!(
        backend.commands(),
        vec![Command::SetNotify(true, characteristic)]
    );
}

#[tokio::test]
async fn test_listen_does_not_toggle_notifications() {
    let backend = ScriptedPeripheral::silent();
    let peripheral = backend.facade();
    let service = service_on(&peripheral);
    let watched = characteristic_in(&service, vec![CharacteristicProperty::Notify]);
    let other = characteristic_in(&service, vec![CharacteristicProperty::Notify]);

    let mut updates = peripheral.listen_for_updates(&watched);
    backend.publish(PeripheralEvent::CharacteristicValueUpdated {
        characteristic: other.with_value(Some(vec![0])),
        error: None,
    });
    backend.publish(PeripheralEvent::CharacteristicValueUpdated {
        characteristic: watched.clone().with_value(None),
        error: None,
    });

    assert_eq!(updates.next().await, Some(Ok(None)));
    drop(updates);
    assert!(backend.commands().is_empty());
}

#[tokio::test]
async fn test_set_notify_value_is_sent_immediately() {
    let backend = confirming_peripheral();
    let peripheral = backend.facade();
    let characteristic = characteristic_in(&service_on(&peripheral), vec![CharacteristicProperty::Notify]);

    let request = peripheral.set_notify_value(false, &characteristic);
    assert_eq!(
        backend.commands(),
        vec![Command::SetNotify(false, characteristic)]
    );
    assert_eq!(request.await, Ok(()));
}

#[tokio::test]
async fn test_side_channel_streams() {
    let backend = ScriptedPeripheral::silent();
    let peripheral = backend.facade();
    let service = service_on(&peripheral);

    let mut names = peripheral.name_updates();
    let mut invalidated = peripheral.invalidated_service_updates();
    let mut ready = peripheral.ready_to_send_write_without_response();

    backend.publish(PeripheralEvent::NameUpdated(Some("thermo".to_string())));
    backend.publish(PeripheralEvent::ServicesInvalidated(vec![service.clone()]));
    backend.publish(PeripheralEvent::ReadyToSendWriteWithoutResponse);

    assert_eq!(names.next().await, Some(Ok(Some("thermo".to_string()))));
    assert_eq!(invalidated.next().await, Some(Ok(vec![service])));
    assert_eq!(ready.next().await, Some(Ok(())));
}
