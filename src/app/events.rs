//! Events flowing from the radio task to the broker bridge.
//!
//! The [`GatewayServer`](crate::gateway::GatewayServer) pushes these into
//! the [`BridgeQueues`](crate::bridge::BridgeQueues).  The broker-facing
//! task on the other side decides what to do with them: publish over MQTT,
//! log, update a display.

use crate::protocol::{NodeId, PhysicalId, TelemetryFields};

/// Accepted telemetry from one node, enriched with link quality.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub node_id: NodeId,
    pub device_name: PhysicalId,
    /// Gateway monotonic time the frame was accepted.
    pub timestamp_ms: u64,
    /// Device fields plus `rssi` and `snr`.
    pub fields: TelemetryFields,
}

/// Lifecycle and delivery notifications for the broker side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// A node joined for the first time (new slot allocated).
    DeviceConnected { node_id: NodeId, device_name: PhysicalId },

    /// A reliable command was acknowledged.
    Delivered { device_name: PhysicalId, message_id: u16 },

    /// A reliable command exhausted its retries without an ack.
    DeliveryFailed { device_name: PhysicalId, message_id: u16 },
}
