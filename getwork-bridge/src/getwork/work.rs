//! Getwork work encoding.
//!
//! Getwork hands miners a 128-byte `data` blob rather than a bare header: the
//! 80-byte block header followed by SHA-256 padding, with every 32-bit word
//! byte-swapped. The `target` is the 256-bit share target, little-endian,
//! hex encoded.
//!
//! ```text
//! bytes 0..80    block header (nonce at 76..80)
//! byte  80       0x80 padding marker
//! bytes 81..120  zero
//! bytes 120..128 message length in bits (640), big-endian
//! ```

use bitcoin::block::Header as BlockHeader;
use bitcoin::consensus::encode;
use bitcoin::pow::Target;

use crate::error::{Error, Result};

/// Length of the decoded getwork `data` field.
pub const DATA_LEN: usize = 128;

/// Length of a serialized block header.
pub const HEADER_LEN: usize = 80;

/// One unit of getwork: the payload handed to miners and its share target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Work {
    /// Hex-encoded getwork data (256 characters)
    pub data: String,

    /// Hex-encoded little-endian target (64 characters)
    pub target: String,
}

impl Work {
    /// Wrap an already-encoded payload and target.
    pub fn new(data: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            target: target.into(),
        }
    }

    /// Encode a block header template and share target.
    pub fn from_header(header: &BlockHeader, target: &Target) -> Self {
        Self {
            data: encode_data(header),
            target: encode_target(target),
        }
    }
}

/// Encode a header into getwork `data` hex.
pub fn encode_data(header: &BlockHeader) -> String {
    let mut bytes = [0u8; DATA_LEN];
    bytes[..HEADER_LEN].copy_from_slice(&encode::serialize(header));
    bytes[HEADER_LEN] = 0x80;
    bytes[DATA_LEN - 8..].copy_from_slice(&((HEADER_LEN as u64) * 8).to_be_bytes());
    swap_words(&mut bytes);
    hex::encode(bytes)
}

/// Decode getwork `data` hex back into the block header it carries.
///
/// Only the header part is interpreted; the padding is not checked, since
/// some miners return it zeroed.
pub fn decode_data(data: &str) -> Result<BlockHeader> {
    let mut bytes = hex::decode(data.trim()).map_err(|e| Error::Work(e.to_string()))?;
    if bytes.len() < HEADER_LEN || bytes.len() % 4 != 0 {
        return Err(Error::Work(format!(
            "data is {} bytes, expected {DATA_LEN}",
            bytes.len()
        )));
    }
    swap_words(&mut bytes);
    encode::deserialize(&bytes[..HEADER_LEN]).map_err(|e| Error::Work(e.to_string()))
}

/// Encode a target the way getwork clients expect it.
pub fn encode_target(target: &Target) -> String {
    hex::encode(target.to_le_bytes())
}

fn swap_words(bytes: &mut [u8]) {
    for word in bytes.chunks_exact_mut(4) {
        word.reverse();
    }
}
