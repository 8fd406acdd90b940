//! Frame checksum: CRC-32/MPEG-2.
//!
//! Polynomial `0x04C11DB7`, MSB-first, seed `0xFFFFFFFF`, no reflection,
//! no final XOR.  Nodes and gateways must agree on this variant bit for bit;
//! it is part of the wire contract, not an internal hash.

use crc::{CRC_32_MPEG_2, Crc};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Checksum of `data`.
pub fn checksum(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}
