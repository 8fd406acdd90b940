//! Commands originated by the broker side.
//!
//! These arrive from the message-broker client (ThingsBoard RPC in the
//! deployed gateway) and are handed to the
//! [`CommandDispatcher`](crate::gateway::CommandDispatcher), which resolves
//! the device name and queues a sealed frame for the radio task.

/// One `{deviceName, method, params}` request.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub device_name: String,
    pub method: String,
    pub params: serde_json::Value,
}

impl CommandRequest {
    pub fn new(device_name: &str, method: &str, params: serde_json::Value) -> Self {
        Self {
            device_name: device_name.into(),
            method: method.into(),
            params,
        }
    }
}
