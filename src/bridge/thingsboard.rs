//! ThingsBoard gateway-API payloads.
//!
//! The deployed gateway speaks the ThingsBoard MQTT gateway API on behalf
//! of every node.  The MQTT client itself lives outside this crate; these
//! helpers only shape the JSON it publishes and parse the RPC it receives.
//!
//! ```text
//! v1/gateway/connect    {"device":"AA:BB:CC:DD:EE:FF"}
//! v1/gateway/telemetry  {"AA:BB:CC:DD:EE:FF":[{"ts":123,"values":{...}}]}
//! v1/gateway/rpc  (in)  {"device":"AA:BB:CC:DD:EE:FF","data":{"method":"setPump","params":{...}}}
//! ```

use log::warn;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::app::commands::CommandRequest;
use crate::app::events::TelemetryEvent;

pub const TELEMETRY_TOPIC: &str = "v1/gateway/telemetry";
pub const CONNECT_TOPIC: &str = "v1/gateway/connect";
pub const RPC_TOPIC: &str = "v1/gateway/rpc";

/// Announce one device to the broker.
pub fn connect_payload(device_name: &str) -> String {
    json!({ "device": device_name }).to_string()
}

/// Publish one telemetry event under its device name.
pub fn telemetry_payload(event: &TelemetryEvent) -> String {
    let mut root = Map::new();
    root.insert(
        event.device_name.to_string(),
        json!([{ "ts": event.timestamp_ms, "values": event.fields }]),
    );
    Value::Object(root).to_string()
}

#[derive(Deserialize)]
struct RpcRequest {
    device: String,
    data: RpcData,
}

#[derive(Deserialize)]
struct RpcData {
    method: String,
    #[serde(default)]
    params: Value,
}

/// Parse a server-side RPC request.  `None` (logged) if it is not one.
pub fn parse_rpc_request(payload: &[u8]) -> Option<CommandRequest> {
    match serde_json::from_slice::<RpcRequest>(payload) {
        Ok(req) if !req.device.is_empty() => Some(CommandRequest {
            device_name: req.device,
            method: req.data.method,
            params: req.data.params,
        }),
        Ok(_) => {
            warn!("ThingsBoard RPC: empty device name");
            None
        }
        Err(e) => {
            warn!("ThingsBoard RPC: JSON parsing failed: {}", e);
            None
        }
    }
}
