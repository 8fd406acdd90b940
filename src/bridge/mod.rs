//! Bridge queue fabric between the radio task and the broker task.
//!
//! ```text
//! ┌──────────────┐  OutboundFrame   ┌──────────────┐
//! │ Broker task  │─────────────────▶│  Radio task  │
//! │ (dispatcher) │◀─────────────────│ (gateway)    │
//! └──────────────┘ TelemetryEvent,  └──────────────┘
//!                  BridgeEvent
//! ```
//!
//! - [`channels`]: bounded, drop-newest queues
//! - [`thingsboard`]: gateway-API payloads for the broker side

pub mod channels;
pub mod thingsboard;

pub use channels::{BRIDGE, BridgeQueues, OutboundFrame};
