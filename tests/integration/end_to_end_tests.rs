//! Node and gateway talking through mock radios.  Frames are moved
//! between the two radios by hand, so every hop is visible to the test.

use std::sync::Arc;

use serde_json::json;

use crate::mock_radio::{ManualClock, MemStore, MockRadio, codec};

use lorabridge::app::commands::CommandRequest;
use lorabridge::app::events::BridgeEvent;
use lorabridge::app::ports::CommandDisposition;
use lorabridge::bridge::BridgeQueues;
use lorabridge::config::{GatewayConfig, KeyMaterial, NodeConfig};
use lorabridge::gateway::{CommandDispatcher, GatewayServer};
use lorabridge::node::{NodeClient, NodeEvent, NodeState, ReservoirSensor, WellPumpStation};
use lorabridge::protocol::{Codec, FieldValue, PhysicalId};
use lorabridge::registry::DeviceRegistry;

type Gateway<'q> = GatewayServer<'q, MockRadio, MemStore, ManualClock>;
type Node<D> = NodeClient<MockRadio, MemStore, ManualClock, D>;

fn gateway<'q>(queues: &'q BridgeQueues, clock: &ManualClock) -> (Gateway<'q>, Arc<DeviceRegistry<MemStore, ManualClock>>) {
    let config = GatewayConfig::default();
    let registry = Arc::new(DeviceRegistry::open(
        MemStore::default(),
        clock.clone(),
        config.offline_timeout_ms,
    ));
    let mut server = GatewayServer::new(
        MockRadio::new(),
        Arc::clone(&registry),
        queues,
        codec(),
        clock.clone(),
        &config,
    );
    server.start(&config, || {}).unwrap();
    (server, registry)
}

fn node<D: lorabridge::app::ports::DevicePort>(
    clock: &ManualClock,
    codec: Codec,
    device: D,
    mac: &str,
) -> Node<D> {
    let mut node = NodeClient::new(
        MockRadio::new(),
        MemStore::default(),
        clock.clone(),
        codec,
        device,
        PhysicalId::try_from(mac).unwrap(),
        NodeConfig::default(),
    );
    node.start().unwrap();
    node
}

/// Node → gateway, let the gateway run once, gateway → node.
fn exchange<D: lorabridge::app::ports::DevicePort>(node: &mut Node<D>, gw: &mut Gateway<'_>) {
    let uplink = node.radio_mut().deliver_to(gw.radio_mut());
    gw.poll(uplink > 0);
    gw.radio_mut().deliver_to(node.radio_mut());
}

fn join<D: lorabridge::app::ports::DevicePort>(node: &mut Node<D>, gw: &mut Gateway<'_>) -> u8 {
    assert_eq!(node.poll(), Some(NodeEvent::JoinRequested));
    exchange(node, gw);
    let Some(NodeEvent::Joined(id)) = node.poll() else {
        panic!("node did not join");
    };
    id
}

#[test]
fn pump_station_joins_reports_and_obeys() {
    let queues = BridgeQueues::new();
    let clock = ManualClock::at(0);
    let (mut gw, registry) = gateway(&queues, &clock);
    let mut pump = node(&clock, codec(), WellPumpStation::default(), "AA:BB:CC:DD:EE:10");

    assert_eq!(join(&mut pump, &mut gw), 1);
    assert!(matches!(
        queues.next_event(),
        Some(BridgeEvent::DeviceConnected { node_id: 1, .. })
    ));

    // First joined poll sends telemetry.
    {
        let r = &mut pump.device_mut().readings;
        r.temperature_c = 21.5;
        r.humidity_pct = 40.0;
        r.voltage = 12.0;
        r.pressure_ok = true;
    }
    assert_eq!(pump.poll(), Some(NodeEvent::TelemetrySent(1)));
    exchange(&mut pump, &mut gw);
    let telemetry = queues.next_telemetry().expect("forwarded");
    assert_eq!(telemetry.device_name.as_str(), "AA:BB:CC:DD:EE:10");
    assert_eq!(telemetry.fields.get("temperature"), Some(&FieldValue::Number(21.5)));
    assert_eq!(telemetry.fields.get("pump_on"), Some(&FieldValue::Bool(false)));
    assert!(telemetry.fields.contains_key("rssi"));

    // Broker turns the pump on.
    let dispatcher = CommandDispatcher::new(Arc::clone(&registry), &queues, codec());
    let id = dispatcher
        .submit(&CommandRequest::new(
            "AA:BB:CC:DD:EE:10",
            "setPump",
            json!({"state": true}),
        ))
        .unwrap();
    gw.poll(false);
    gw.radio_mut().deliver_to(pump.radio_mut());

    assert_eq!(
        pump.poll(),
        Some(NodeEvent::Command {
            method: "setPump".into(),
            disposition: CommandDisposition::Applied,
            acked: true,
        })
    );
    assert!(pump.device().pump_on);
    assert_eq!(pump.sequence(), 2);

    exchange(&mut pump, &mut gw);
    assert_eq!(
        queues.next_event(),
        Some(BridgeEvent::Delivered {
            device_name: PhysicalId::try_from("AA:BB:CC:DD:EE:10").unwrap(),
            message_id: id,
        })
    );
    assert!(!gw.is_awaiting_ack());
}

#[test]
fn rejoined_node_starts_counting_from_one_again() {
    let queues = BridgeQueues::new();
    let clock = ManualClock::at(0);
    let (mut gw, registry) = gateway(&queues, &clock);
    let mut tank = node(&clock, codec(), ReservoirSensor::default(), "AA:BB:CC:DD:EE:20");

    let id = join(&mut tank, &mut gw);
    tank.send_telemetry().unwrap();
    tank.send_telemetry().unwrap();
    exchange(&mut tank, &mut gw);
    assert_eq!(registry.record(id).unwrap().last_sequence, 2);

    tank.reset_identity();
    assert_eq!(join(&mut tank, &mut gw), id);
    assert_eq!(tank.send_telemetry(), Ok(1));
    exchange(&mut tank, &mut gw);

    assert_eq!(registry.record(id).unwrap().last_sequence, 1);
    let mut forwarded = 0;
    while queues.next_telemetry().is_some() {
        forwarded += 1;
    }
    assert_eq!(forwarded, 3);
    assert_eq!(registry.len(), 1);
}

#[test]
fn node_with_wrong_key_never_joins() {
    let queues = BridgeQueues::new();
    let clock = ManualClock::at(0);
    let (mut gw, registry) = gateway(&queues, &clock);
    let foreign = Codec::new(KeyMaterial {
        key: *b"0123456789abcdef",
        iv: *b"fedcba9876543210",
    });
    let mut rogue = node(&clock, foreign, ReservoirSensor::default(), "AA:BB:CC:DD:EE:30");

    assert_eq!(rogue.poll(), Some(NodeEvent::JoinRequested));
    exchange(&mut rogue, &mut gw);
    assert!(rogue.radio().inbound.is_empty());
    assert!(registry.is_empty());

    clock.advance(5_000);
    assert_eq!(rogue.poll(), Some(NodeEvent::JoinTimedOut));
    assert_eq!(rogue.state(), NodeState::Unjoined);
}

#[test]
fn other_nodes_ignore_commands_not_addressed_to_them() {
    let queues = BridgeQueues::new();
    let clock = ManualClock::at(0);
    let (mut gw, registry) = gateway(&queues, &clock);
    let mut pump = node(&clock, codec(), WellPumpStation::default(), "AA:BB:CC:DD:EE:10");
    let mut other = node(&clock, codec(), WellPumpStation::default(), "AA:BB:CC:DD:EE:11");
    join(&mut pump, &mut gw);
    join(&mut other, &mut gw);
    // Get the due telemetry out of the way so the next poll listens.
    pump.send_telemetry().unwrap();
    other.send_telemetry().unwrap();
    pump.radio_mut().sent.clear();
    other.radio_mut().sent.clear();

    let dispatcher = CommandDispatcher::new(Arc::clone(&registry), &queues, codec());
    dispatcher
        .submit(&CommandRequest::new(
            "AA:BB:CC:DD:EE:10",
            "setPump",
            json!({"state": true}),
        ))
        .unwrap();
    gw.poll(false);
    // Broadcast medium: both radios hear the command.
    let frame = gw.radio().sent[0].clone();
    other
        .radio_mut()
        .push_inbound(lorabridge::protocol::FrameBuf::from_slice(&frame).unwrap());
    gw.radio_mut().deliver_to(pump.radio_mut());

    assert_eq!(other.poll(), None);
    assert!(!other.device().pump_on);
    assert!(other.radio().sent.is_empty());

    assert!(matches!(pump.poll(), Some(NodeEvent::Command { acked: true, .. })));
    assert!(pump.device().pump_on);
}
