//! LoRa bridge library.
//!
//! Encrypted telemetry/command link between battery field nodes and a
//! gateway that forwards to an IoT broker.  Exposes the pure-logic modules
//! for integration testing; ESP-IDF specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.
//!
//! ```text
//!  node ──TELEMETRY / ACK──▶ gateway ──TelemetryEvent──▶ bridge ──▶ broker
//!  node ◀──JOIN_ACCEPT / CMD── gateway ◀──OutboundFrame── bridge ◀── broker
//! ```

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod bridge;
pub mod config;
pub mod drivers;
pub mod error;
pub mod gateway;
pub mod node;
pub mod protocol;
pub mod radio;
pub mod registry;
