//! Structured plaintext carried inside a sealed frame.
//!
//! The JSON shape is the deployed wire format: a `"type"` discriminator
//! plus kind-specific keys.
//!
//! ```text
//! {"type":"JOIN_REQUEST","mac":"AA:BB:CC:DD:EE:FF","devType":"PUMP_STATION"}
//! {"type":"JOIN_ACCEPT","nodeId":1}
//! {"type":"TELEMETRY","nodeId":1,"msgCtr":7,"data":{"level_full":true}}
//! {"type":"CMD","nodeId":1,"msgId":3,"method":"setPump","params":{"state":true}}
//! {"type":"ACK","nodeId":1,"msgId":3,"msgCtr":8}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Logical node identity assigned at join (1..=MAX_DEVICES, 0 = none).
pub type NodeId = u8;

/// Per-command identifier echoed by the node's ack.
pub type MessageId = u16;

/// Longest accepted physical identity (a formatted MAC needs 17).
pub const PHYSICAL_ID_LEN: usize = 24;

/// Longest accepted device class tag.
pub const DEVICE_CLASS_LEN: usize = 24;

/// Physical device identity, typically `"AA:BB:CC:DD:EE:FF"`.
pub type PhysicalId = heapless::String<PHYSICAL_ID_LEN>;

/// Free-form device type tag.
pub type DeviceClass = heapless::String<DEVICE_CLASS_LEN>;

/// One telemetry value.  Only numbers and booleans cross the link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
}

impl FieldValue {
    /// `false` for NaN/inf numbers, which JSON cannot carry.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Bool(_) => true,
            Self::Number(n) => n.is_finite(),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        Self::Number(f64::from(v))
    }
}

/// Telemetry payload, keyed by field name.
pub type TelemetryFields = BTreeMap<String, FieldValue>;

/// Deployed nodes write a failed sensor read as `null`.  Those fields are
/// skipped so the rest of the reading still gets through.
fn skip_null_fields<'de, D>(deserializer: D) -> Result<TelemetryFields, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Option<FieldValue>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(name, value)| match value {
            Some(v) => Some((name, v)),
            None => {
                log::debug!("Telemetry: field '{}' is null, skipped", name);
                None
            }
        })
        .collect())
}

/// Every message kind exchanged over the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    JoinRequest {
        #[serde(rename = "mac")]
        physical_id: String,
        #[serde(rename = "devType")]
        device_class: String,
    },

    JoinAccept {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
    },

    Telemetry {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
        #[serde(rename = "msgCtr")]
        sequence: u32,
        #[serde(rename = "data", deserialize_with = "skip_null_fields")]
        fields: TelemetryFields,
    },

    #[serde(rename = "CMD")]
    Command {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
        /// Absent for fire-and-forget commands.
        #[serde(rename = "msgId", default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
        method: String,
        #[serde(default)]
        params: serde_json::Value,
    },

    Ack {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
        #[serde(rename = "msgId")]
        message_id: MessageId,
        #[serde(rename = "msgCtr")]
        sequence: u32,
    },
}

impl Message {
    /// Wire name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinRequest { .. } => "JOIN_REQUEST",
            Self::JoinAccept { .. } => "JOIN_ACCEPT",
            Self::Telemetry { .. } => "TELEMETRY",
            Self::Command { .. } => "CMD",
            Self::Ack { .. } => "ACK",
        }
    }
}
