//! Inter-task channels.
//!
//! Uses `embassy-sync` bounded MPMC channels so the radio task and the
//! broker task share queues without heap allocation or blocking.  A full
//! queue drops the newest item and logs it: the radio task must never stall
//! behind a slow broker.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use crate::app::events::{BridgeEvent, TelemetryEvent};
use crate::config::{EVENT_QUEUE_DEPTH, RX_QUEUE_DEPTH, TX_QUEUE_DEPTH};
use crate::protocol::{FrameBuf, MessageId, NodeId, PhysicalId};

/// A sealed frame waiting for the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub node_id: NodeId,
    pub device_name: PhysicalId,
    pub message_id: MessageId,
    /// Wire bytes, ready to transmit.
    pub frame: FrameBuf,
    /// Hold the radio until the node acks `message_id`.
    pub require_ack: bool,
}

/// The three queues connecting the radio task to the broker task.
pub struct BridgeQueues {
    outbound: Channel<CriticalSectionRawMutex, OutboundFrame, TX_QUEUE_DEPTH>,
    telemetry: Channel<CriticalSectionRawMutex, TelemetryEvent, RX_QUEUE_DEPTH>,
    events: Channel<CriticalSectionRawMutex, BridgeEvent, EVENT_QUEUE_DEPTH>,
}

/// Process-wide queues used by the firmware tasks.
pub static BRIDGE: BridgeQueues = BridgeQueues::new();

impl Default for BridgeQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeQueues {
    pub const fn new() -> Self {
        Self {
            outbound: Channel::new(),
            telemetry: Channel::new(),
            events: Channel::new(),
        }
    }

    // ── Broker → radio ────────────────────────────────────────

    /// Queue a frame for transmission.  `false` if the queue was full and
    /// the frame was dropped.
    pub fn send_outbound(&self, frame: OutboundFrame) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(_) => {
                warn!("Bridge: outbound queue full, dropping frame");
                false
            }
        }
    }

    pub fn next_outbound(&self) -> Option<OutboundFrame> {
        self.outbound.try_receive().ok()
    }

    /// Frames waiting for the radio.
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    // ── Radio → broker ────────────────────────────────────────

    pub fn publish_telemetry(&self, event: TelemetryEvent) -> bool {
        match self.telemetry.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                warn!("Bridge: telemetry queue full, dropping event");
                false
            }
        }
    }

    pub fn next_telemetry(&self) -> Option<TelemetryEvent> {
        self.telemetry.try_receive().ok()
    }

    pub fn publish_event(&self, event: BridgeEvent) -> bool {
        match self.events.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                warn!("Bridge: event queue full, dropping event");
                false
            }
        }
    }

    pub fn next_event(&self) -> Option<BridgeEvent> {
        self.events.try_receive().ok()
    }
}
