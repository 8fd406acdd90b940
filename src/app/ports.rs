//! Port traits: the hexagonal boundary between protocol logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ NodeClient / GatewayServer / DeviceRegistry
//! ```
//!
//! Driven adapters (radio, flash, clock, device personality) implement these
//! traits.  The protocol endpoints consume them via generics, so the core
//! never touches a radio driver or flash partition directly.
//!
//! ## Notes
//!
//! - **ConfigPort** implementations MUST validate before persisting.
//! - **Transceiver** receive hooks run in interrupt context: they may only
//!   signal, never call back into the radio.
//! - All port errors are typed; callers must handle every variant explicitly.

use crate::protocol::{FrameBuf, TelemetryFields};

// ───────────────────────────────────────────────────────────────
// Transceiver port (driven adapter: domain ↔ packet radio)
// ───────────────────────────────────────────────────────────────

/// Duplex packet radio.  The core never assumes a modulation; it only
/// needs these primitives plus the "data arrived" hook.
pub trait Transceiver {
    /// Bring the radio up on `frequency_mhz`.
    fn begin(&mut self, frequency_mhz: f32) -> Result<(), TransportError>;

    /// Transmit one packet.  Blocks for the radio's own time-on-air.
    fn transmit(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read one packet, waiting at most `timeout_ms` (0 = only what is
    /// already buffered).  [`TransportError::Timeout`] when nothing came.
    fn receive(&mut self, timeout_ms: u32) -> Result<FrameBuf, TransportError>;

    /// Enter continuous-listen mode.
    fn start_receive(&mut self) -> Result<(), TransportError>;

    /// RSSI of the last received packet, in dBm.
    fn last_rssi(&self) -> f32;

    /// SNR of the last received packet, in dB.
    fn last_snr(&self) -> f32;

    /// Install the "packet received" hook.  Called from interrupt context.
    fn set_receive_hook(&mut self, hook: fn());
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond time source.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

// ───────────────────────────────────────────────────────────────
// Device port (driven adapter: node protocol ↔ sensors/actuators)
// ───────────────────────────────────────────────────────────────

/// What the device did with an inbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandDisposition {
    /// The command was recognised and its effect applied.
    Applied,
    /// Unknown method or unusable parameters; nothing changed.
    Unsupported,
}

/// Capabilities of one field-device personality.  The join/telemetry/ack
/// state machine is shared; only these three hooks differ per device.
pub trait DevicePort {
    /// Device class tag sent in the join request (e.g. `"PUMP_STATION"`).
    fn device_class(&self) -> &str;

    /// Current telemetry fields.
    fn read_telemetry_fields(&mut self) -> TelemetryFields;

    /// Apply a command's effect.
    fn apply_command(&mut self, method: &str, params: &serde_json::Value) -> CommandDisposition;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists one configuration record.
///
/// Implementations MUST validate values before persisting.  Invalid ranges
/// are rejected with [`ConfigError::ValidationFailed`], not clamped.
pub trait ConfigPort<T> {
    /// Load from persistent storage.  Returns defaults if nothing is stored.
    fn load(&self) -> Result<T, ConfigError>;

    /// Validate and persist.
    fn save(&mut self, config: &T) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent namespaced key → string store (node identity, device table,
/// config, credentials).
///
/// Writes MUST be atomic per key: no partial values after power loss.
/// ESP-IDF NVS guarantees this natively; the in-memory simulation trivially.
pub trait StoragePort {
    /// Read a value.  `Ok(None)` when the key is absent.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value atomically.
    fn put(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`Transceiver`] operations.  Codes are the driver's own
/// status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Radio did not come up.
    InitFailed(i16),
    /// Transmission failed (channel busy, driver error).
    TxFailed(i16),
    /// Reception failed (CRC error at PHY level, driver error).
    RxFailed(i16),
    /// No packet within the receive window.
    Timeout,
    /// Packet larger than one radio payload.
    Oversize,
}

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Underlying storage failed.
    Storage(StorageError),
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Storage partition is full.
    Full,
    /// Key or value rejected by the backend (too long, bad characters).
    InvalidKey,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InitFailed(code) => write!(f, "radio init failed ({})", code),
            Self::TxFailed(code) => write!(f, "transmit failed ({})", code),
            Self::RxFailed(code) => write!(f, "receive failed ({})", code),
            Self::Timeout => write!(f, "receive timeout"),
            Self::Oversize => write!(f, "packet exceeds radio payload"),
        }
    }
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::Storage(e) => write!(f, "storage: {}", e),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Full => write!(f, "storage full"),
            Self::InvalidKey => write!(f, "invalid key or value"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl From<StorageError> for ConfigError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}
