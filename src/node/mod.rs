//! Node side of the link.
//!
//! - [`client`]: join / telemetry / command state machine
//! - [`personality`]: what a particular node measures and accepts

pub mod client;
pub mod personality;

pub use client::{NODE_NAMESPACE, NodeClient, NodeEvent, NodeState};
pub use personality::{PumpReadings, ReservoirSensor, WellPumpStation};
