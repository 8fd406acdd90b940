//! Frame sealing and opening.
//!
//! Wire format (one radio packet):
//! ```text
//! {"p":"<base64 AES-128-CBC ciphertext>","c":<CRC-32 of plaintext>}
//! ```
//!
//! Opening checks, in order: envelope JSON, base64, block alignment,
//! padding, checksum.  Only a frame that passes all of them is parsed as a
//! [`Message`].  Every failure maps to one [`CodecError`]; callers drop the
//! frame without answering the sender.

use core::fmt;

use aes::Aes128;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use heapless::Vec;
use serde::{Deserialize, Serialize};

use super::FrameBuf;
use super::crc;
use super::message::Message;
use crate::config::{KeyMaterial, MAX_FRAME_SIZE};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// AES block size.
const BLOCK_SIZE: usize = 16;

/// Largest ciphertext whose envelope still fits in one radio packet:
/// base64(160) is 216 chars, plus `{"p":"","c":4294967295}` is 239 bytes.
pub const MAX_CIPHERTEXT_SIZE: usize = 160;

/// Largest plaintext [`Codec::seal`] accepts (padding adds at least one byte).
pub const MAX_PLAINTEXT_SIZE: usize = MAX_CIPHERTEXT_SIZE - 1;

/// Recovered plaintext.
pub type PlainBuf = Vec<u8, MAX_CIPHERTEXT_SIZE>;

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Pad length outside `1..=16` or pad bytes not all equal.
    BadPadding,
    /// Recomputed plaintext checksum differs from the frame's.
    ChecksumMismatch,
    /// Envelope, encoding, ciphertext length or message JSON invalid.
    Malformed,
    /// Message does not fit in one radio packet.
    TooLarge,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadPadding => write!(f, "bad padding"),
            Self::ChecksumMismatch => write!(f, "checksum mismatch"),
            Self::Malformed => write!(f, "malformed frame"),
            Self::TooLarge => write!(f, "frame too large"),
        }
    }
}

// ── Frame ─────────────────────────────────────────────────────

/// The envelope exchanged over the radio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Frame {
    /// base64 ciphertext
    #[serde(rename = "p")]
    pub payload: String,
    /// CRC-32/MPEG-2 of the unpadded plaintext
    #[serde(rename = "c")]
    pub checksum: u32,
}

impl Frame {
    /// Serialize the envelope into a radio packet.
    pub fn to_wire(&self) -> Result<FrameBuf, CodecError> {
        let bytes = serde_json::to_vec(self).map_err(|_| CodecError::Malformed)?;
        FrameBuf::from_slice(&bytes).map_err(|()| CodecError::TooLarge)
    }

    /// Parse a received radio packet into an envelope.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(CodecError::Malformed);
        }
        serde_json::from_slice(bytes).map_err(|_| CodecError::Malformed)
    }
}

// ── Codec ─────────────────────────────────────────────────────

/// Seals and opens frames with one pre-shared key/IV pair.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    keys: KeyMaterial,
}

impl Codec {
    pub fn new(keys: KeyMaterial) -> Self {
        Self { keys }
    }

    /// Pad, encrypt and checksum `plaintext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Frame, CodecError> {
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(CodecError::TooLarge);
        }

        let mut buf: Vec<u8, MAX_CIPHERTEXT_SIZE> = Vec::new();
        buf.extend_from_slice(plaintext)
            .map_err(|()| CodecError::TooLarge)?;

        // PKCS#7: always 1..=16 bytes, each holding the pad length.
        let pad = BLOCK_SIZE - plaintext.len() % BLOCK_SIZE;
        for _ in 0..pad {
            buf.push(pad as u8).map_err(|_| CodecError::TooLarge)?;
        }

        let len = buf.len();
        let ciphertext = Aes128CbcEnc::new(&self.keys.key.into(), &self.keys.iv.into())
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map_err(|_| CodecError::TooLarge)?;

        Ok(Frame {
            payload: STANDARD.encode(ciphertext),
            checksum: crc::checksum(plaintext),
        })
    }

    /// Decode, decrypt, unpad and verify a frame, returning the plaintext.
    pub fn open_plaintext(&self, frame: &Frame) -> Result<PlainBuf, CodecError> {
        if frame.payload.len() > MAX_FRAME_SIZE {
            return Err(CodecError::Malformed);
        }

        // Sized for the decoder's length estimate, not the real output.
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let len = STANDARD
            .decode_slice(frame.payload.as_bytes(), &mut buf)
            .map_err(|_| CodecError::Malformed)?;
        if len == 0 || len % BLOCK_SIZE != 0 || len > MAX_CIPHERTEXT_SIZE {
            return Err(CodecError::Malformed);
        }

        let padded = Aes128CbcDec::new(&self.keys.key.into(), &self.keys.iv.into())
            .decrypt_padded_mut::<NoPadding>(&mut buf[..len])
            .map_err(|_| CodecError::Malformed)?;
        let plaintext = strip_padding(padded)?;

        if crc::checksum(plaintext) != frame.checksum {
            return Err(CodecError::ChecksumMismatch);
        }

        PlainBuf::from_slice(plaintext).map_err(|()| CodecError::Malformed)
    }

    /// Open a frame and parse the message it carries.
    pub fn open(&self, frame: &Frame) -> Result<Message, CodecError> {
        let plaintext = self.open_plaintext(frame)?;
        serde_json::from_slice(&plaintext).map_err(|_| CodecError::Malformed)
    }

    /// Serialize, seal and envelope `message` into one radio packet.
    pub fn seal_message(&self, message: &Message) -> Result<FrameBuf, CodecError> {
        let plaintext = serde_json::to_vec(message).map_err(|_| CodecError::Malformed)?;
        self.seal(&plaintext)?.to_wire()
    }

    /// Parse, open and decode one received radio packet.
    pub fn open_wire(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        let frame = Frame::from_wire(bytes)?;
        self.open(&frame)
    }
}

/// Validate and remove PKCS#7 padding.  The last byte is only trusted once
/// it is a legal pad length and every pad byte repeats it.
fn strip_padding(buf: &[u8]) -> Result<&[u8], CodecError> {
    let Some(&last) = buf.last() else {
        return Err(CodecError::BadPadding);
    };
    let pad = usize::from(last);
    if pad == 0 || pad > BLOCK_SIZE || pad > buf.len() {
        return Err(CodecError::BadPadding);
    }
    let (body, tail) = buf.split_at(buf.len() - pad);
    if tail.iter().any(|&b| b != last) {
        return Err(CodecError::BadPadding);
    }
    Ok(body)
}
