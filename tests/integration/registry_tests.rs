//! Registry behaviour seen through the gateway: capacity, reboot survival
//! and concurrent access from the broker side.

use std::sync::Arc;
use std::thread;

use crate::mock_radio::{ManualClock, MemStore, MockRadio, codec, seal};

use lorabridge::app::ports::StoragePort;
use lorabridge::bridge::BridgeQueues;
use lorabridge::config::{GatewayConfig, MAX_DEVICES};
use lorabridge::error::RegistryError;
use lorabridge::gateway::{DropReason, FrameOutcome, GatewayServer};
use lorabridge::protocol::{Message, TelemetryFields};
use lorabridge::registry::{DEVICES_NAMESPACE, DeviceRegistry};

fn mac(i: usize) -> String {
    format!("AA:BB:CC:00:00:{:02X}", i)
}

fn join_request(i: usize) -> Message {
    Message::JoinRequest {
        physical_id: mac(i),
        device_class: "RESERVOIR_SENSOR".into(),
    }
}

#[test]
fn full_gateway_ignores_twenty_first_device() {
    let queues = BridgeQueues::new();
    let clock = ManualClock::at(0);
    let config = GatewayConfig::default();
    let registry = Arc::new(DeviceRegistry::open(MemStore::default(), clock.clone(), 300_000));
    let mut gw = GatewayServer::new(MockRadio::new(), Arc::clone(&registry), &queues, codec(), clock, &config);

    for i in 0..MAX_DEVICES {
        assert!(matches!(
            gw.handle_frame(&seal(&join_request(i))),
            FrameOutcome::Joined { is_new: true, .. }
        ));
    }
    gw.radio_mut().sent.clear();

    assert_eq!(
        gw.handle_frame(&seal(&join_request(MAX_DEVICES))),
        FrameOutcome::Dropped(DropReason::Registry(RegistryError::Full))
    );
    assert!(gw.radio().sent.is_empty());
    assert_eq!(registry.len(), MAX_DEVICES);

    // Known devices still rejoin while full.
    assert!(matches!(
        gw.handle_frame(&seal(&join_request(3))),
        FrameOutcome::Joined { node_id: 4, is_new: false }
    ));
}

#[test]
fn identities_survive_gateway_reboot() {
    let clock = ManualClock::at(0);
    let registry = DeviceRegistry::open(MemStore::default(), clock.clone(), 300_000);
    registry.register(&mac(1), "WELL_PUMP_STATION").unwrap();
    registry.register(&mac(2), "RESERVOIR_SENSOR").unwrap();
    registry.check_sequence(2, 77);
    let store = registry.into_store();
    assert!(store.exists(DEVICES_NAMESPACE, "dev_1"));

    // After the reboot the node keeps sending with its old id and counter.
    let queues = BridgeQueues::new();
    let registry = Arc::new(DeviceRegistry::open(store, clock.clone(), 300_000));
    let mut gw = GatewayServer::new(
        MockRadio::new(),
        Arc::clone(&registry),
        &queues,
        codec(),
        clock,
        &GatewayConfig::default(),
    );
    assert_eq!(registry.id_of(&mac(2)), Some(2));
    assert_eq!(
        gw.handle_frame(&seal(&Message::Telemetry {
            node_id: 2,
            sequence: 78,
            fields: TelemetryFields::new(),
        })),
        FrameOutcome::TelemetryAccepted {
            node_id: 2,
            sequence: 78
        }
    );
    assert_eq!(queues.next_telemetry().unwrap().device_name.as_str(), mac(2));
}

#[test]
fn failed_flash_write_refuses_join() {
    let queues = BridgeQueues::new();
    let clock = ManualClock::at(0);
    let store = MemStore {
        fail_writes: true,
        ..MemStore::default()
    };
    let registry = Arc::new(DeviceRegistry::open(store, clock.clone(), 300_000));
    let mut gw = GatewayServer::new(
        MockRadio::new(),
        Arc::clone(&registry),
        &queues,
        codec(),
        clock,
        &GatewayConfig::default(),
    );

    assert!(matches!(
        gw.handle_frame(&seal(&join_request(1))),
        FrameOutcome::Dropped(DropReason::Registry(RegistryError::Storage(_)))
    ));
    assert!(gw.radio().sent.is_empty());
    assert!(registry.is_empty());
}

#[test]
fn concurrent_registration_and_lookup() {
    let registry = Arc::new(DeviceRegistry::open(
        MemStore::default(),
        ManualClock::at(0),
        300_000,
    ));

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..5 {
                    registry.register(&mac(t * 5 + i), "RESERVOIR_SENSOR").unwrap();
                }
            })
        })
        .collect();
    let reader = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            for _ in 0..200 {
                for name in registry.active_names() {
                    assert!(registry.id_of(&name).is_some());
                }
            }
        })
    };
    for w in writers {
        w.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(registry.len(), MAX_DEVICES);
    let mut ids: Vec<_> = (0..MAX_DEVICES).map(|i| registry.id_of(&mac(i)).unwrap()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), MAX_DEVICES);
}
