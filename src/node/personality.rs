//! Field-device personalities.
//!
//! Each deployed device shares the same [`NodeClient`](super::NodeClient)
//! and differs only in what it reports and which commands it accepts.
//! Sampling and actuator driving live outside this crate: the firmware's
//! sensor task writes readings into these structs and reads the commanded
//! outputs back.

use log::{info, warn};
use serde_json::Value;

use crate::app::ports::{CommandDisposition, DevicePort};
use crate::protocol::{FieldValue, TelemetryFields};

/// `setPump {"state": bool}`
pub const METHOD_SET_PUMP: &str = "setPump";

// ── Reservoir level sensor ────────────────────────────────────

/// Float-switch reservoir sensor.  Reports on level change; accepts no
/// commands.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservoirSensor {
    pub level_full: bool,
    pub voltage: f32,
}

impl ReservoirSensor {
    pub const DEVICE_CLASS: &'static str = "RESERVOIR_SENSOR";
}

impl Default for ReservoirSensor {
    fn default() -> Self {
        Self {
            level_full: false,
            voltage: 3.3,
        }
    }
}

impl DevicePort for ReservoirSensor {
    fn device_class(&self) -> &str {
        Self::DEVICE_CLASS
    }

    fn read_telemetry_fields(&mut self) -> TelemetryFields {
        let mut fields = TelemetryFields::new();
        fields.insert("level_full".into(), FieldValue::from(self.level_full));
        fields.insert("voltage".into(), FieldValue::from(self.voltage));
        fields
    }

    fn apply_command(&mut self, method: &str, _params: &Value) -> CommandDisposition {
        warn!("Reservoir: unsupported command '{}'", method);
        CommandDisposition::Unsupported
    }
}

// ── Well pump station ─────────────────────────────────────────

/// Latest environment readings of a pump station.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpReadings {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub voltage: f32,
    pub pressure_ok: bool,
}

impl Default for PumpReadings {
    fn default() -> Self {
        Self {
            temperature_c: f32::NAN,
            humidity_pct: f32::NAN,
            voltage: 0.0,
            pressure_ok: false,
        }
    }
}

/// Well pump with temperature/humidity/pressure sensing.  Periodic
/// telemetry; accepts `setPump`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WellPumpStation {
    pub readings: PumpReadings,
    /// Commanded pump output; the actuator task mirrors it to the relay.
    pub pump_on: bool,
}

impl WellPumpStation {
    pub const DEVICE_CLASS: &'static str = "WELL_PUMP_STATION";
}

impl DevicePort for WellPumpStation {
    fn device_class(&self) -> &str {
        Self::DEVICE_CLASS
    }

    fn read_telemetry_fields(&mut self) -> TelemetryFields {
        let r = self.readings;
        let mut fields = TelemetryFields::new();
        fields.insert("temperature".into(), FieldValue::from(r.temperature_c));
        fields.insert("humidity".into(), FieldValue::from(r.humidity_pct));
        fields.insert("voltage".into(), FieldValue::from(r.voltage));
        fields.insert("pressure_ok".into(), FieldValue::from(r.pressure_ok));
        fields.insert("pump_on".into(), FieldValue::from(self.pump_on));
        fields
    }

    fn apply_command(&mut self, method: &str, params: &Value) -> CommandDisposition {
        if method != METHOD_SET_PUMP {
            warn!("PumpStation: unsupported command '{}'", method);
            return CommandDisposition::Unsupported;
        }
        let Some(state) = params.get("state").and_then(Value::as_bool) else {
            warn!("PumpStation: setPump without boolean 'state'");
            return CommandDisposition::Unsupported;
        };
        info!("PumpStation: pump {}", if state { "ON" } else { "OFF" });
        self.pump_on = state;
        CommandDisposition::Applied
    }
}
