//! Link protocol shared by nodes and the gateway.
//!
//! ```text
//!  Message ──serde_json──▶ plaintext ──PKCS#7 + AES-128-CBC──▶ ciphertext
//!                              │                                   │
//!                           CRC-32                              base64
//!                              ▼                                   ▼
//!                        {"p": "<ciphertext>", "c": <crc>}  ──▶ radio
//! ```
//!
//! - [`crc`]: CRC-32/MPEG-2 over the plaintext
//! - [`codec`]: [`Frame`] and the [`Codec`] that seals/opens it
//! - [`message`]: the five message kinds and their JSON shape

pub mod codec;
pub mod crc;
pub mod message;

pub use codec::{Codec, CodecError, Frame};
pub use message::{
    DeviceClass, FieldValue, Message, MessageId, NodeId, PhysicalId, TelemetryFields,
};

use crate::config::MAX_FRAME_SIZE;

/// One radio packet, bounded by the PHY payload size.
pub type FrameBuf = heapless::Vec<u8, MAX_FRAME_SIZE>;
