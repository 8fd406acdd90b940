//! Protocol configuration parameters
//!
//! Tunable timings for both endpoints, the shared key material, and the
//! compile-time capacities that size the fixed buffers and queues.
//! Timings can be overridden via NVS (see [`NvsAdapter`](crate::adapters::nvs::NvsAdapter)).

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;

// ── Capacities ────────────────────────────────────────────────

/// Device table slots on the gateway.  Node ids are `1..=MAX_DEVICES`.
pub const MAX_DEVICES: usize = 20;

/// Largest packet the radio carries (one LoRa PHY payload).
pub const MAX_FRAME_SIZE: usize = 255;

/// Outbound (broker → radio) queue depth.
pub const TX_QUEUE_DEPTH: usize = 10;

/// Inbound telemetry (radio → broker) queue depth.
pub const RX_QUEUE_DEPTH: usize = 10;

/// Lifecycle/delivery event queue depth.
pub const EVENT_QUEUE_DEPTH: usize = 5;

// ── Gateway ───────────────────────────────────────────────────

/// Gateway radio-task configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Carrier frequency in MHz
    pub frequency_mhz: f32,
    /// A device unheard for this long counts as offline
    pub offline_timeout_ms: u32,
    /// Wait for an ACK before retransmitting
    pub ack_timeout_ms: u32,
    /// Retransmissions after the first send before giving up
    pub max_ack_retries: u8,
    /// Upper bound on one radio-task wait for the receive interrupt
    pub poll_interval_ms: u32,
    /// `begin()` attempts at boot before the radio is declared dead
    pub radio_init_attempts: u8,
    /// Task watchdog timeout
    pub watchdog_timeout_secs: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: 868.0,
            offline_timeout_ms: 300_000, // 5 min
            ack_timeout_ms: 5_000,
            max_ack_retries: 3,
            poll_interval_ms: 50,
            radio_init_attempts: 3,
            watchdog_timeout_secs: 30,
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_frequency(self.frequency_mhz)?;
        if !(10_000..=86_400_000).contains(&self.offline_timeout_ms) {
            return Err(ConfigError::ValidationFailed(
                "offline_timeout_ms must be 10 s–24 h",
            ));
        }
        if !(500..=60_000).contains(&self.ack_timeout_ms) {
            return Err(ConfigError::ValidationFailed(
                "ack_timeout_ms must be 500–60000",
            ));
        }
        if self.max_ack_retries > 10 {
            return Err(ConfigError::ValidationFailed("max_ack_retries must be 0–10"));
        }
        if !(1..=1_000).contains(&self.poll_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "poll_interval_ms must be 1–1000",
            ));
        }
        if self.radio_init_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "radio_init_attempts must be at least 1",
            ));
        }
        if u64::from(self.watchdog_timeout_secs) * 1000 <= u64::from(self.poll_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "watchdog_timeout_secs must exceed poll_interval_ms",
            ));
        }
        Ok(())
    }
}

// ── Node ──────────────────────────────────────────────────────

/// Node protocol-client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Carrier frequency in MHz
    pub frequency_mhz: f32,
    /// Delay between join attempts while unjoined
    pub join_interval_ms: u32,
    /// How long one join attempt waits for JOIN_ACCEPT
    pub join_accept_timeout_ms: u32,
    /// Receive window per poll while joined
    pub listen_timeout_ms: u32,
    /// Periodic telemetry; `None` = only on external trigger
    pub telemetry_interval_ms: Option<u32>,
    /// Sensor-only nodes skip the command receive window
    pub listen_for_commands: bool,
    /// `begin()` attempts at boot before the radio is declared dead
    pub radio_init_attempts: u8,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: 868.0,
            join_interval_ms: 10_000,
            join_accept_timeout_ms: 5_000,
            listen_timeout_ms: 1_000,
            telemetry_interval_ms: Some(30_000),
            listen_for_commands: true,
            radio_init_attempts: 3,
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_frequency(self.frequency_mhz)?;
        if !(1_000..=3_600_000).contains(&self.join_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "join_interval_ms must be 1 s–1 h",
            ));
        }
        if self.join_accept_timeout_ms >= self.join_interval_ms {
            return Err(ConfigError::ValidationFailed(
                "join_accept_timeout_ms must be < join_interval_ms",
            ));
        }
        if self.listen_timeout_ms > 10_000 {
            return Err(ConfigError::ValidationFailed(
                "listen_timeout_ms must be 0–10000",
            ));
        }
        if let Some(interval) = self.telemetry_interval_ms {
            if !(1_000..=86_400_000).contains(&interval) {
                return Err(ConfigError::ValidationFailed(
                    "telemetry_interval_ms must be 1 s–24 h",
                ));
            }
        }
        if self.radio_init_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "radio_init_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

fn validate_frequency(mhz: f32) -> Result<(), ConfigError> {
    // Sub-GHz ISM bands the supported transceivers tune to.
    if !(150.0..=960.0).contains(&mhz) {
        return Err(ConfigError::ValidationFailed(
            "frequency_mhz must be 150.0–960.0",
        ));
    }
    Ok(())
}

// ── Key material ──────────────────────────────────────────────

/// Pre-shared AES-128 key and CBC IV.
///
/// Every node and the gateway share one static pair, so identical
/// plaintexts produce identical ciphertexts.  Kept for interoperability
/// with deployed nodes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KeyMaterial {
    pub key: [u8; 16],
    pub iv: [u8; 16],
}

impl KeyMaterial {
    /// Parse a 32-character hex string into one 16-byte half.
    pub fn parse_hex(text: &str) -> Option<[u8; 16]> {
        let text = text.trim();
        if text.len() != 32 || !text.is_ascii() {
            return None;
        }
        let mut out = [0u8; 16];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&text[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(out)
    }
}

impl Default for KeyMaterial {
    fn default() -> Self {
        Self {
            key: *b"HydrauParkSecret",
            iv: *b"EGCSOHydraulique",
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial { .. }")
    }
}
