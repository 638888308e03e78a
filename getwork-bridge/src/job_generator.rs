//! Job generator for creating getwork locally.
//!
//! The local manager uses this to hand miners real block headers when no
//! upstream pool is attached. This is useful for:
//! - Bringing up getwork miners without pool connectivity
//! - Exercising long polling end to end
//! - Checking that a miner returns valid solutions
//!
//! Headers are recognizable: the previous block hash starts with `TEST` and
//! the merkle root carries the job counter, so every job is unique.

use bitcoin::block::{Header as BlockHeader, Version};
use bitcoin::hash_types::{BlockHash, TxMerkleNode};
use bitcoin::hashes::Hash;
use bitcoin::pow::{CompactTarget, Target};

use crate::tracing::prelude::*;

/// Merkle root of Bitcoin's genesis block, internal byte order.
const GENESIS_MERKLE_ROOT: [u8; 32] = [
    0x3b, 0xa3, 0xed, 0xfd, 0x7a, 0x7b, 0x12, 0xb2, 0x7a, 0xc7, 0x2c, 0x3e, 0x67, 0x76, 0x8f, 0x61,
    0x7f, 0xc8, 0x1b, 0xc3, 0x88, 0x8a, 0x51, 0x32, 0x3a, 0x9f, 0xb8, 0xaa, 0x4b, 0x1e, 0x5e, 0x4a,
];

/// A generated job: header template (nonce zero) and share target.
#[derive(Debug, Clone)]
pub struct GeneratedJob {
    pub id: u64,
    pub header: BlockHeader,
    pub target: Target,
}

/// Generates mining jobs locally.
pub struct JobGenerator {
    /// Nominal block height, mixed into the previous block hash
    block_height: u32,
    /// Share target for generated jobs
    target: Target,
    /// Version field for block header
    version: Version,
    /// Job ID counter
    job_id_counter: u64,
}

impl JobGenerator {
    /// Create a new job generator with the given share difficulty.
    ///
    /// Difficulty 1.0 is Bitcoin difficulty 1 (target `0x1d00ffff`). Values
    /// below one give easier targets, which is handy for CPU miners.
    pub fn new(difficulty: f64) -> Self {
        Self {
            block_height: 800_000,
            target: difficulty_to_target(difficulty),
            version: Version::TWO,
            job_id_counter: 0,
        }
    }

    /// Generate the next mining job.
    pub fn next_job(&mut self) -> GeneratedJob {
        let id = self.job_id_counter;
        self.job_id_counter += 1;

        let mut prev_blockhash = [0u8; 32];
        prev_blockhash[0..4].copy_from_slice(&self.block_height.to_be_bytes());
        prev_blockhash[4..8].copy_from_slice(b"TEST");

        let mut merkle_root = [0u8; 32];
        merkle_root[0..7].copy_from_slice(b"GETWORK");
        merkle_root[7..15].copy_from_slice(&id.to_be_bytes());

        let header = BlockHeader {
            version: self.version,
            prev_blockhash: BlockHash::from_byte_array(prev_blockhash),
            merkle_root: TxMerkleNode::from_byte_array(merkle_root),
            time: unix_time(),
            bits: self.target.to_compact_lossy(),
            nonce: 0,
        };

        debug!(
            job_id = id,
            block_height = self.block_height,
            bits = format!("{:08x}", header.bits.to_consensus()),
            "Generated job"
        );

        GeneratedJob {
            id,
            header,
            target: self.target,
        }
    }

    /// Genesis block header (nonce zeroed) and its winning nonce.
    pub fn known_good_header() -> (BlockHeader, u32) {
        let header = BlockHeader {
            version: Version::ONE,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::from_byte_array(GENESIS_MERKLE_ROOT),
            time: 0x495fab29,
            bits: CompactTarget::from_consensus(0x1d00ffff),
            nonce: 0,
        };

        (header, 2083236893)
    }
}

/// Convert share difficulty to a target: `diff1_target / difficulty`.
///
/// Saturates at the maximum 256-bit target for absurdly small difficulties,
/// and for non-positive ones, which configuration already rejects.
pub fn difficulty_to_target(difficulty: f64) -> Target {
    if difficulty.is_nan() || difficulty <= 0.0 {
        return Target::from_le_bytes([0xff; 32]);
    }

    // diff1 target is 0xffff << 208. Compute the mantissa with 64 fractional
    // bits, then shift the remaining 144 bits by byte placement.
    let scaled = (65535.0 / difficulty) * 2f64.powi(64);
    let mantissa = if scaled >= u128::MAX as f64 {
        u128::MAX
    } else {
        scaled as u128
    };

    let mut bytes = [0u8; 32];
    let mantissa_bytes = mantissa.to_le_bytes();
    const OFFSET: usize = 144 / 8;
    if mantissa_bytes[32 - OFFSET..].iter().any(|&b| b != 0) {
        return Target::from_le_bytes([0xff; 32]);
    }
    bytes[OFFSET..].copy_from_slice(&mantissa_bytes[..32 - OFFSET]);
    Target::from_le_bytes(bytes)
}

/// Check whether a solved header meets a target.
pub fn meets_target(header: &BlockHeader, target: &Target) -> (BlockHash, bool) {
    let block_hash = header.block_hash();
    let hash_as_target = Target::from_le_bytes(block_hash.to_byte_array());
    (block_hash, hash_as_target <= *target)
}

fn unix_time() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or_default()
}
