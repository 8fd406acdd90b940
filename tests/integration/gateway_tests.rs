//! Gateway server against a mock radio: joins, telemetry forwarding,
//! replay and tamper rejection, and the reliable command path.

use std::sync::Arc;

use serde_json::json;

use crate::mock_radio::{ManualClock, MemStore, MockRadio, seal};

use lorabridge::app::commands::CommandRequest;
use lorabridge::app::events::BridgeEvent;
use lorabridge::bridge::BridgeQueues;
use lorabridge::config::GatewayConfig;
use lorabridge::error::{DispatchError, Error, RegistryError};
use lorabridge::gateway::{CommandDispatcher, DropReason, FrameOutcome, GatewayServer};
use lorabridge::protocol::{FieldValue, Message, TelemetryFields};
use lorabridge::registry::DeviceRegistry;

const PUMP_MAC: &str = "AA:BB:CC:DD:EE:01";
const TANK_MAC: &str = "AA:BB:CC:DD:EE:02";

type Registry = DeviceRegistry<MemStore, ManualClock>;
type Server<'q> = GatewayServer<'q, MockRadio, MemStore, ManualClock>;

struct Harness<'q> {
    server: Server<'q>,
    dispatcher: CommandDispatcher<'q, MemStore, ManualClock>,
    registry: Arc<Registry>,
    clock: ManualClock,
    queues: &'q BridgeQueues,
}

fn harness(queues: &BridgeQueues) -> Harness<'_> {
    let clock = ManualClock::at(1_000);
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
        crate::mock_radio::codec(),
        clock.clone(),
        &config,
    );
    server.start(&config, || {}).unwrap();
    let dispatcher = CommandDispatcher::new(Arc::clone(&registry), queues, crate::mock_radio::codec());
    Harness {
        server,
        dispatcher,
        registry,
        clock,
        queues,
    }
}

impl Harness<'_> {
    /// Deliver one frame through the receive path.
    fn receive(&mut self, message: &Message) {
        self.server.radio_mut().push_inbound(seal(message));
        self.server.poll(true);
    }

    fn join(&mut self, mac: &str, class: &str) -> u8 {
        let outcome = self.server.handle_frame(&seal(&Message::JoinRequest {
            physical_id: mac.into(),
            device_class: class.into(),
        }));
        let FrameOutcome::Joined { node_id, .. } = outcome else {
            panic!("join refused: {:?}", outcome);
        };
        self.server.radio_mut().sent.clear();
        while self.queues.next_event().is_some() {}
        node_id
    }

    fn sent(&self) -> &[Vec<u8>] {
        &self.server.radio().sent
    }

    fn set_pump(&self, device: &str) -> Result<u16, DispatchError> {
        self.dispatcher
            .submit(&CommandRequest::new(device, "setPump", json!({"state": true})))
    }
}

fn level(full: bool) -> TelemetryFields {
    let mut fields = TelemetryFields::new();
    fields.insert("level_full".into(), FieldValue::Bool(full));
    fields
}

// ── Join ──────────────────────────────────────────────────────

#[test]
fn first_join_gets_node_one_and_accept() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);

    h.receive(&Message::JoinRequest {
        physical_id: PUMP_MAC.into(),
        device_class: "WELL_PUMP_STATION".into(),
    });

    assert_eq!(h.sent().len(), 1);
    assert_eq!(
        h.server.radio().sent_message(0),
        Message::JoinAccept { node_id: 1 }
    );
    assert_eq!(h.registry.id_of(PUMP_MAC), Some(1));
    assert!(matches!(
        queues.next_event(),
        Some(BridgeEvent::DeviceConnected { node_id: 1, .. })
    ));
}

#[test]
fn rejoin_keeps_id_without_new_connect_event() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    let first = h.join(PUMP_MAC, "WELL_PUMP_STATION");

    let outcome = h.server.handle_frame(&seal(&Message::JoinRequest {
        physical_id: PUMP_MAC.into(),
        device_class: "WELL_PUMP_STATION".into(),
    }));

    assert_eq!(
        outcome,
        FrameOutcome::Joined {
            node_id: first,
            is_new: false
        }
    );
    assert_eq!(h.server.radio().sent_message(0), Message::JoinAccept { node_id: first });
    assert!(queues.next_event().is_none());
    assert_eq!(h.registry.len(), 1);
}

#[test]
fn distinct_devices_get_distinct_ids() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    assert_eq!(h.join(PUMP_MAC, "WELL_PUMP_STATION"), 1);
    assert_eq!(h.join(TANK_MAC, "RESERVOIR_SENSOR"), 2);
}

#[test]
fn join_with_empty_identity_is_silently_refused() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    let outcome = h.server.handle_frame(&seal(&Message::JoinRequest {
        physical_id: String::new(),
        device_class: "X".into(),
    }));
    assert_eq!(
        outcome,
        FrameOutcome::Dropped(DropReason::Registry(RegistryError::InvalidIdentity))
    );
    assert!(h.sent().is_empty());
}

// ── Telemetry ─────────────────────────────────────────────────

#[test]
fn telemetry_is_forwarded_with_link_quality() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    let node = h.join(TANK_MAC, "RESERVOIR_SENSOR");

    h.clock.advance(250);
    h.receive(&Message::Telemetry {
        node_id: node,
        sequence: 1,
        fields: level(true),
    });

    let event = queues.next_telemetry().expect("telemetry forwarded");
    assert_eq!(event.node_id, node);
    assert_eq!(event.device_name.as_str(), TANK_MAC);
    assert_eq!(event.timestamp_ms, 1_250);
    assert_eq!(event.fields.get("level_full"), Some(&FieldValue::Bool(true)));
    assert_eq!(event.fields.get("rssi"), Some(&FieldValue::Number(-80.5)));
    assert_eq!(event.fields.get("snr"), Some(&FieldValue::Number(7.25)));

    let record = h.registry.record(node).unwrap();
    assert_eq!(record.last_sequence, 1);
    assert_eq!(record.last_seen_ms, Some(1_250));
    // Telemetry is never answered.
    assert!(h.sent().is_empty());
}

#[test]
fn null_sensor_fields_do_not_discard_the_reading() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    let node = h.join(PUMP_MAC, "PUMP_STATION");

    // Failed DHT read, as deployed pump firmware encodes it.
    let plaintext = json!({
        "type": "TELEMETRY",
        "nodeId": node,
        "msgCtr": 1,
        "data": {"temperature": null, "humidity": null, "voltage": 12.6, "pressure_ok": true},
    })
    .to_string();
    let frame = crate::mock_radio::codec()
        .seal(plaintext.as_bytes())
        .unwrap()
        .to_wire()
        .unwrap();

    assert_eq!(
        h.server.handle_frame(&frame),
        FrameOutcome::TelemetryAccepted {
            node_id: node,
            sequence: 1
        }
    );
    let event = queues.next_telemetry().expect("telemetry forwarded");
    assert!(!event.fields.contains_key("temperature"));
    assert!(!event.fields.contains_key("humidity"));
    assert_eq!(event.fields.get("voltage"), Some(&FieldValue::Number(12.6)));
    assert_eq!(event.fields.get("pressure_ok"), Some(&FieldValue::Bool(true)));
}

#[test]
fn replayed_sequence_is_dropped() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    let node = h.join(TANK_MAC, "RESERVOIR_SENSOR");
    let frame = Message::Telemetry {
        node_id: node,
        sequence: 5,
        fields: level(false),
    };

    assert_eq!(
        h.server.handle_frame(&seal(&frame)),
        FrameOutcome::TelemetryAccepted {
            node_id: node,
            sequence: 5
        }
    );
    assert_eq!(
        h.server.handle_frame(&seal(&frame)),
        FrameOutcome::Dropped(DropReason::Replay {
            node_id: node,
            sequence: 5
        })
    );
    let older = Message::Telemetry {
        node_id: node,
        sequence: 4,
        fields: level(false),
    };
    assert!(matches!(
        h.server.handle_frame(&seal(&older)),
        FrameOutcome::Dropped(DropReason::Replay { .. })
    ));

    assert!(queues.next_telemetry().is_some());
    assert!(queues.next_telemetry().is_none());
    assert_eq!(h.registry.record(node).unwrap().last_sequence, 5);
    assert!(h.sent().is_empty());
}

#[test]
fn telemetry_from_unknown_node_is_dropped() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    assert_eq!(
        h.server.handle_frame(&seal(&Message::Telemetry {
            node_id: 9,
            sequence: 1,
            fields: level(true),
        })),
        FrameOutcome::Dropped(DropReason::Unregistered(9))
    );
    assert!(queues.next_telemetry().is_none());
}

#[test]
fn rejoin_restarts_sequence_window() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    let node = h.join(TANK_MAC, "RESERVOIR_SENSOR");
    h.server.handle_frame(&seal(&Message::Telemetry {
        node_id: node,
        sequence: 40,
        fields: level(true),
    }));

    // Node lost its counter and joined again.
    h.join(TANK_MAC, "RESERVOIR_SENSOR");
    assert_eq!(
        h.server.handle_frame(&seal(&Message::Telemetry {
            node_id: node,
            sequence: 1,
            fields: level(true),
        })),
        FrameOutcome::TelemetryAccepted {
            node_id: node,
            sequence: 1
        }
    );
}

#[test]
fn replayed_join_reopens_captured_telemetry() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    let join = seal(&Message::JoinRequest {
        physical_id: TANK_MAC.into(),
        device_class: "RESERVOIR_SENSOR".into(),
    });
    let FrameOutcome::Joined { node_id: node, .. } = h.server.handle_frame(&join) else {
        panic!("join refused");
    };
    let captured = seal(&Message::Telemetry {
        node_id: node,
        sequence: 1,
        fields: level(true),
    });
    assert!(matches!(
        h.server.handle_frame(&captured),
        FrameOutcome::TelemetryAccepted { .. }
    ));
    assert!(matches!(
        h.server.handle_frame(&captured),
        FrameOutcome::Dropped(DropReason::Replay { .. })
    ));

    // Static key: the same join bytes re-join and reset the window.
    assert_eq!(
        h.server.handle_frame(&join),
        FrameOutcome::Joined {
            node_id: node,
            is_new: false
        }
    );
    assert!(matches!(
        h.server.handle_frame(&captured),
        FrameOutcome::TelemetryAccepted { .. }
    ));
}

#[test]
fn tampered_frame_gets_no_reply() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    let mut frame = seal(&Message::JoinRequest {
        physical_id: PUMP_MAC.into(),
        device_class: "WELL_PUMP_STATION".into(),
    });
    // Flip one checksum digit: `..."c":<digits>}`.
    let last_digit = frame.len() - 2;
    frame[last_digit] = if frame[last_digit] == b'1' { b'2' } else { b'1' };

    h.server.radio_mut().push_inbound(frame);
    h.server.poll(true);

    assert!(h.sent().is_empty());
    assert!(h.registry.is_empty());
    assert!(queues.next_event().is_none());
}

#[test]
fn garbage_is_dropped_as_codec_error() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    assert!(matches!(
        h.server.handle_frame(b"not a frame"),
        FrameOutcome::Dropped(DropReason::Codec(_))
    ));
}

#[test]
fn node_bound_messages_are_ignored() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    assert_eq!(
        h.server.handle_frame(&seal(&Message::JoinAccept { node_id: 1 })),
        FrameOutcome::Dropped(DropReason::WrongDirection)
    );
}

#[test]
fn burst_of_frames_drained_in_one_wakeup() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    let node = h.join(TANK_MAC, "RESERVOIR_SENSOR");
    for seq in 1..=3 {
        h.server.radio_mut().push_inbound(seal(&Message::Telemetry {
            node_id: node,
            sequence: seq,
            fields: level(seq % 2 == 0),
        }));
    }
    h.server.poll(true);
    assert_eq!(h.registry.record(node).unwrap().last_sequence, 3);
    assert!(h.server.radio().inbound.is_empty());
}

#[test]
fn frames_beyond_one_burst_are_read_without_another_interrupt() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    let node = h.join(TANK_MAC, "RESERVOIR_SENSOR");
    for seq in 1..=5 {
        h.server.radio_mut().push_inbound(seal(&Message::Telemetry {
            node_id: node,
            sequence: seq,
            fields: level(seq % 2 == 0),
        }));
    }

    h.server.poll(true);
    assert_eq!(h.registry.record(node).unwrap().last_sequence, 4);
    assert_eq!(h.server.radio().inbound.len(), 1);

    // No new interrupt: the backlog alone triggers the next read.
    h.server.poll(false);
    assert_eq!(h.registry.record(node).unwrap().last_sequence, 5);
    assert!(h.server.radio().inbound.is_empty());

    let mut forwarded = 0;
    while queues.next_telemetry().is_some() {
        forwarded += 1;
    }
    assert_eq!(forwarded, 5);
}

// ── Commands ──────────────────────────────────────────────────

#[test]
fn command_to_unknown_device_is_not_sent() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    assert_eq!(h.set_pump(PUMP_MAC), Err(DispatchError::UnknownDevice));
    assert_eq!(queues.outbound_len(), 0);
    h.server.poll(false);
    assert!(h.sent().is_empty());
}

#[test]
fn command_is_sent_and_delivered_on_ack() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    let node = h.join(PUMP_MAC, "WELL_PUMP_STATION");

    let id = h.set_pump(PUMP_MAC).unwrap();
    h.server.poll(false);
    assert_eq!(
        h.server.radio().sent_message(0),
        Message::Command {
            node_id: node,
            message_id: Some(id),
            method: "setPump".into(),
            params: json!({"state": true}),
        }
    );
    assert!(h.server.is_awaiting_ack());

    h.receive(&Message::Ack {
        node_id: node,
        message_id: id,
        sequence: 1,
    });
    assert!(!h.server.is_awaiting_ack());
    assert_eq!(
        queues.next_event(),
        Some(BridgeEvent::Delivered {
            device_name: PUMP_MAC.try_into().unwrap(),
            message_id: id,
        })
    );
}

#[test]
fn unanswered_command_retries_three_times_then_fails() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    h.join(PUMP_MAC, "WELL_PUMP_STATION");

    let id = h.set_pump(PUMP_MAC).unwrap();
    h.server.poll(false);
    assert_eq!(h.sent().len(), 1);

    // Timeout is strict: exactly 5000 ms later is still waiting.
    h.clock.advance(5_000);
    h.server.poll(false);
    assert_eq!(h.sent().len(), 1);

    for expected in 2..=4 {
        h.clock.advance(5_001);
        h.server.poll(false);
        assert_eq!(h.sent().len(), expected);
    }
    // Every retransmission is byte-identical.
    assert!(h.sent().iter().all(|f| *f == h.sent()[0]));

    let second = h.set_pump(PUMP_MAC).unwrap();
    h.clock.advance(5_001);
    h.server.poll(false);

    assert_eq!(
        queues.next_event(),
        Some(BridgeEvent::DeliveryFailed {
            device_name: PUMP_MAC.try_into().unwrap(),
            message_id: id,
        })
    );
    // The queued command went out in the same iteration.
    assert_eq!(h.sent().len(), 5);
    assert!(matches!(
        h.server.radio().sent_message(4),
        Message::Command { message_id: Some(m), .. } if m == second
    ));
}

#[test]
fn later_commands_wait_behind_pending_ack() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    let node = h.join(PUMP_MAC, "WELL_PUMP_STATION");

    let first = h.set_pump(PUMP_MAC).unwrap();
    let second = h.set_pump(PUMP_MAC).unwrap();
    assert_ne!(first, second);

    h.server.poll(false);
    h.server.poll(false);
    assert_eq!(h.sent().len(), 1);
    assert_eq!(queues.outbound_len(), 1);

    h.receive(&Message::Ack {
        node_id: node,
        message_id: first,
        sequence: 1,
    });
    h.server.poll(false);
    assert_eq!(h.sent().len(), 2);
    assert!(matches!(
        h.server.radio().sent_message(1),
        Message::Command { message_id: Some(m), .. } if m == second
    ));
}

#[test]
fn ack_from_wrong_node_does_not_resolve() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    let pump = h.join(PUMP_MAC, "WELL_PUMP_STATION");
    let tank = h.join(TANK_MAC, "RESERVOIR_SENSOR");

    let id = h.set_pump(PUMP_MAC).unwrap();
    h.server.poll(false);

    assert_eq!(
        h.server.handle_frame(&seal(&Message::Ack {
            node_id: tank,
            message_id: id,
            sequence: 1,
        })),
        FrameOutcome::Dropped(DropReason::StrayAck {
            node_id: tank,
            message_id: id
        })
    );
    assert!(h.server.is_awaiting_ack());
    assert_eq!(
        h.server.handle_frame(&seal(&Message::Ack {
            node_id: pump,
            message_id: id,
            sequence: 1,
        })),
        FrameOutcome::AckMatched {
            node_id: pump,
            message_id: id
        }
    );
}

#[test]
fn failed_first_transmit_is_retried() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    h.join(PUMP_MAC, "WELL_PUMP_STATION");
    h.set_pump(PUMP_MAC).unwrap();

    h.server.radio_mut().fail_tx = true;
    h.server.poll(false);
    assert!(h.sent().is_empty());
    assert!(h.server.is_awaiting_ack());

    h.server.radio_mut().fail_tx = false;
    h.clock.advance(5_001);
    h.server.poll(false);
    assert_eq!(h.sent().len(), 1);
}

// ── Startup and status ────────────────────────────────────────

#[test]
fn radio_start_retries_then_gives_up() {
    let queues = BridgeQueues::new();
    let config = GatewayConfig::default();
    let clock = ManualClock::at(0);
    let registry = Arc::new(DeviceRegistry::open(MemStore::default(), clock.clone(), 300_000));

    let mut flaky = MockRadio::new();
    flaky.begin_failures = 2;
    let mut server = GatewayServer::new(flaky, Arc::clone(&registry), &queues, crate::mock_radio::codec(), clock.clone(), &config);
    assert!(server.start(&config, || {}).is_ok());
    assert_eq!(server.radio().begin_calls, 3);
    assert!(server.radio().hook.is_some());

    let mut dead = MockRadio::new();
    dead.begin_failures = u8::MAX;
    let mut server = GatewayServer::new(dead, registry, &queues, crate::mock_radio::codec(), clock, &config);
    assert_eq!(server.start(&config, || {}), Err(Error::Init("radio")));
    assert_eq!(server.radio().begin_calls, config.radio_init_attempts);
}

#[test]
fn status_reflects_activity() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    let status = h.server.status();
    assert_eq!(status.registered_devices, 0);
    assert_eq!(status.last_rx_ms, None);

    h.join(PUMP_MAC, "WELL_PUMP_STATION");
    h.set_pump(PUMP_MAC).unwrap();
    h.set_pump(PUMP_MAC).unwrap();
    h.server.poll(false);

    let status = h.server.status();
    assert_eq!(status.registered_devices, 1);
    assert_eq!(status.online_devices, 1);
    assert_eq!(status.last_rx_ms, Some(1_000));
    assert!(status.awaiting_ack);
    assert_eq!(status.outbound_queued, 1);
}

#[test]
fn silent_device_goes_offline() {
    let queues = BridgeQueues::new();
    let mut h = harness(&queues);
    h.join(PUMP_MAC, "WELL_PUMP_STATION");
    assert_eq!(h.registry.online_count(), 1);
    h.clock.advance(300_001);
    assert_eq!(h.registry.online_count(), 0);
}
