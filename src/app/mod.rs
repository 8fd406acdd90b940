//! Application layer: port traits and the messages exchanged with the
//! broker bridge.
//!
//! ```text
//!   broker ──CommandRequest──▶ gateway ──TelemetryEvent / BridgeEvent──▶ broker
//! ```

pub mod commands;
pub mod events;
pub mod ports;
