//! Gateway protocol server: the radio task.
//!
//! Owns the transceiver.  Each [`poll`](GatewayServer::poll) iteration:
//!
//! 1. checks the ack timer of the in-flight reliable send (retransmit or
//!    give up),
//! 2. if no reliable send is in flight, transmits the next queued command,
//! 3. if the receive interrupt fired, or the previous drain stopped at the
//!    burst limit, drains buffered frames through
//!    [`handle_frame`](GatewayServer::handle_frame),
//! 4. re-arms continuous receive after any radio activity.
//!
//! Inbound frames that fail to open, come from unknown nodes or replay an
//! old sequence are dropped without any reply.  Only a join gets an answer.

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::app::events::{BridgeEvent, TelemetryEvent};
use crate::app::ports::{Clock, StoragePort, Transceiver, TransportError};
use crate::bridge::BridgeQueues;
use crate::config::GatewayConfig;
use crate::drivers::watchdog::Watchdog;
use crate::error::{RegistryError, Result};
use crate::protocol::{
    Codec, CodecError, FieldValue, Message, MessageId, NodeId, TelemetryFields,
};
use crate::radio::{RadioIrq, start_radio};
use crate::registry::DeviceRegistry;

use super::reliable::{PendingAck, ReliableSender, RetryAction};

/// Frames read per receive interrupt.  The notification coalesces, so
/// more than one packet may be buffered by the time the task wakes.
const RX_BURST: usize = 4;

/// Why an inbound frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Envelope, padding, checksum or message JSON invalid.
    Codec(CodecError),
    /// Join refused (registry full, bad identity, flash failure).
    Registry(RegistryError),
    /// Telemetry from a node id with no active record.
    Unregistered(NodeId),
    /// Telemetry sequence not above the last accepted one.
    Replay { node_id: NodeId, sequence: u32 },
    /// Ack with no matching in-flight send.
    StrayAck { node_id: NodeId, message_id: MessageId },
    /// Accepted, but the telemetry queue to the broker was full.
    QueueFull,
    /// A gateway-to-node message kind arrived at the gateway.
    WrongDirection,
}

/// Result of processing one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Joined { node_id: NodeId, is_new: bool },
    TelemetryAccepted { node_id: NodeId, sequence: u32 },
    AckMatched { node_id: NodeId, message_id: MessageId },
    Dropped(DropReason),
}

/// Point-in-time gateway status (display, diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayStatus {
    pub registered_devices: usize,
    pub online_devices: usize,
    /// Monotonic ms of the last frame that opened cleanly.
    pub last_rx_ms: Option<u64>,
    pub awaiting_ack: bool,
    pub outbound_queued: usize,
}

pub struct GatewayServer<'q, R, S, C> {
    radio: R,
    registry: Arc<DeviceRegistry<S, C>>,
    queues: &'q BridgeQueues,
    codec: Codec,
    clock: C,
    sender: ReliableSender,
    /// Radio is in continuous-receive mode.
    rx_armed: bool,
    /// Last drain hit `RX_BURST`; more frames may still be buffered.
    rx_backlog: bool,
    last_rx_ms: Option<u64>,
}

impl<'q, R, S, C> GatewayServer<'q, R, S, C>
where
    R: Transceiver,
    S: StoragePort,
    C: Clock,
{
    pub fn new(
        radio: R,
        registry: Arc<DeviceRegistry<S, C>>,
        queues: &'q BridgeQueues,
        codec: Codec,
        clock: C,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            radio,
            registry,
            queues,
            codec,
            clock,
            sender: ReliableSender::new(config.ack_timeout_ms, config.max_ack_retries),
            rx_armed: false,
            rx_backlog: false,
            last_rx_ms: None,
        }
    }

    /// Bring the radio up, install the receive hook and start listening.
    pub fn start(&mut self, config: &GatewayConfig, on_receive: fn()) -> Result<()> {
        start_radio(&mut self.radio, config.frequency_mhz, config.radio_init_attempts)?;
        self.radio.set_receive_hook(on_receive);
        self.radio.start_receive()?;
        self.rx_armed = true;
        info!("Gateway: listening");
        Ok(())
    }

    /// Radio task loop.  Never blocks longer than `poll_interval` so the
    /// ack timer and the outbound queue are serviced even when the air is
    /// quiet.  Returns once `stop` is set.
    pub fn run(&mut self, irq: &RadioIrq, watchdog: &Watchdog, poll_interval: Duration, stop: &AtomicBool) {
        info!("Gateway: radio task started");
        while !stop.load(Ordering::Relaxed) {
            watchdog.feed();
            // A backlog is read at once; the coalesced IRQ will not fire
            // again for frames already buffered.
            let rx_pending = if self.rx_backlog {
                irq.take()
            } else {
                irq.wait_timeout(poll_interval)
            };
            self.poll(rx_pending);
        }
        info!("Gateway: radio task stopped");
    }

    /// One radio-task iteration.
    pub fn poll(&mut self, rx_pending: bool) {
        self.service_retries();
        self.service_outbound();

        if rx_pending || self.rx_backlog {
            self.rx_backlog = self.drain_rx();
        }

        if !self.rx_armed {
            match self.radio.start_receive() {
                Ok(()) => self.rx_armed = true,
                Err(e) => warn!("LoRa: start_receive failed ({})", e),
            }
        }
    }

    /// Read up to `RX_BURST` buffered frames.  `true` when the limit was
    /// reached and the radio may still hold more.
    fn drain_rx(&mut self) -> bool {
        for _ in 0..RX_BURST {
            match self.radio.receive(0) {
                Ok(frame) => {
                    self.rx_armed = false;
                    self.handle_frame(&frame);
                }
                Err(TransportError::Timeout) => return false,
                Err(e) => {
                    warn!("LoRa RX: receive failed ({})", e);
                    self.rx_armed = false;
                    return false;
                }
            }
        }
        debug!("LoRa RX: burst limit reached, draining again next poll");
        true
    }

    fn transmit(&mut self, frame: &[u8]) -> core::result::Result<(), TransportError> {
        self.rx_armed = false;
        self.radio.transmit(frame)
    }

    fn service_retries(&mut self) {
        let now = self.clock.now_ms();
        match self.sender.poll(now) {
            RetryAction::Wait => {}
            RetryAction::Retransmit(frame) => {
                self.rx_armed = false;
                if let Err(e) = self.radio.transmit(frame) {
                    warn!("LoRa TX: retransmit failed ({})", e);
                }
            }
            RetryAction::GaveUp(p) => {
                self.queues.publish_event(BridgeEvent::DeliveryFailed {
                    device_name: p.device_name,
                    message_id: p.message_id,
                });
            }
        }
    }

    /// Send the next queued command.  While a reliable send awaits its ack,
    /// later commands stay queued behind it.
    fn service_outbound(&mut self) {
        if !self.sender.is_idle() {
            return;
        }
        let Some(out) = self.queues.next_outbound() else {
            return;
        };

        info!(
            "LoRa TX: msgId {} to node {} ({} bytes)",
            out.message_id,
            out.node_id,
            out.frame.len()
        );
        // A failed first transmit still arms the ack timer: the retry path
        // resends the same frame.
        if let Err(e) = self.transmit(&out.frame) {
            warn!("LoRa TX: transmit failed ({})", e);
        }
        if out.require_ack {
            self.sender.begin(PendingAck {
                node_id: out.node_id,
                device_name: out.device_name,
                message_id: out.message_id,
                frame: out.frame,
                sent_at_ms: self.clock.now_ms(),
                retries: 0,
            });
        }
    }

    /// Open and act on one received packet.
    pub fn handle_frame(&mut self, bytes: &[u8]) -> FrameOutcome {
        let rssi = self.radio.last_rssi();
        let snr = self.radio.last_snr();

        let message = match self.codec.open_wire(bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!("LoRa RX: dropped frame ({})", e);
                return FrameOutcome::Dropped(DropReason::Codec(e));
            }
        };
        self.last_rx_ms = Some(self.clock.now_ms());
        debug!("LoRa RX: {} (RSSI {:.1}, SNR {:.1})", message.kind(), rssi, snr);

        match message {
            Message::JoinRequest {
                physical_id,
                device_class,
            } => self.on_join(&physical_id, &device_class, rssi, snr),
            Message::Telemetry {
                node_id,
                sequence,
                fields,
            } => self.on_telemetry(node_id, sequence, fields, rssi, snr),
            Message::Ack {
                node_id,
                message_id,
                ..
            } => self.on_ack(node_id, message_id, rssi, snr),
            other @ (Message::JoinAccept { .. } | Message::Command { .. }) => {
                debug!("LoRa RX: ignoring {} addressed to nodes", other.kind());
                FrameOutcome::Dropped(DropReason::WrongDirection)
            }
        }
    }

    fn on_join(&mut self, physical_id: &str, device_class: &str, rssi: f32, snr: f32) -> FrameOutcome {
        info!("LoRa RX: JOIN_REQUEST from {} ({})", physical_id, device_class);
        let registration = match self.registry.register(physical_id, device_class) {
            Ok(r) => r,
            Err(e) => {
                warn!("LoRa RX: join from {} refused ({})", physical_id, e);
                return FrameOutcome::Dropped(DropReason::Registry(e));
            }
        };
        let node_id = registration.node_id;

        // The node resets its counter when it accepts; follow it.  With the
        // static key a replayed JOIN_REQUEST also lands here, which reopens
        // the window for every telemetry frame captured before it.
        if !registration.is_new {
            self.registry.reset_sequence(node_id);
        }
        self.registry.touch(node_id, rssi, snr);

        match self.codec.seal_message(&Message::JoinAccept { node_id }) {
            Ok(frame) => match self.transmit(&frame) {
                Ok(()) => info!("LoRa TX: JOIN_ACCEPT node {} -> {}", node_id, physical_id),
                Err(e) => warn!("LoRa TX: JOIN_ACCEPT to {} failed ({})", physical_id, e),
            },
            Err(e) => warn!("LoRa TX: cannot seal JOIN_ACCEPT ({})", e),
        }

        if registration.is_new {
            if let Some(device_name) = self.registry.name_of(node_id) {
                self.queues
                    .publish_event(BridgeEvent::DeviceConnected { node_id, device_name });
            }
        }
        FrameOutcome::Joined {
            node_id,
            is_new: registration.is_new,
        }
    }

    fn on_telemetry(
        &mut self,
        node_id: NodeId,
        sequence: u32,
        mut fields: TelemetryFields,
        rssi: f32,
        snr: f32,
    ) -> FrameOutcome {
        if !self.registry.is_registered(node_id) {
            warn!("LoRa RX: telemetry from unregistered node {}", node_id);
            return FrameOutcome::Dropped(DropReason::Unregistered(node_id));
        }
        if !self.registry.check_sequence(node_id, sequence) {
            return FrameOutcome::Dropped(DropReason::Replay { node_id, sequence });
        }
        self.registry.touch(node_id, rssi, snr);

        let Some(device_name) = self.registry.name_of(node_id) else {
            return FrameOutcome::Dropped(DropReason::Unregistered(node_id));
        };

        fields.insert("rssi".into(), FieldValue::from(rssi));
        fields.insert("snr".into(), FieldValue::from(snr));
        let forwarded = self.queues.publish_telemetry(TelemetryEvent {
            node_id,
            device_name,
            timestamp_ms: self.clock.now_ms(),
            fields,
        });
        if !forwarded {
            return FrameOutcome::Dropped(DropReason::QueueFull);
        }
        FrameOutcome::TelemetryAccepted { node_id, sequence }
    }

    fn on_ack(&mut self, node_id: NodeId, message_id: MessageId, rssi: f32, snr: f32) -> FrameOutcome {
        let Some(pending) = self.sender.on_ack(node_id, message_id) else {
            debug!("LoRa RX: stray ACK msgId {} from node {}", message_id, node_id);
            return FrameOutcome::Dropped(DropReason::StrayAck { node_id, message_id });
        };
        self.registry.touch(node_id, rssi, snr);
        self.queues.publish_event(BridgeEvent::Delivered {
            device_name: pending.device_name,
            message_id,
        });
        FrameOutcome::AckMatched { node_id, message_id }
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            registered_devices: self.registry.len(),
            online_devices: self.registry.online_count(),
            last_rx_ms: self.last_rx_ms,
            awaiting_ack: !self.sender.is_idle(),
            outbound_queued: self.queues.outbound_len(),
        }
    }

    pub fn is_awaiting_ack(&self) -> bool {
        !self.sender.is_idle()
    }

    pub fn registry(&self) -> &DeviceRegistry<S, C> {
        &self.registry
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
}
