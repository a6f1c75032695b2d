//! Block header model and its fixed-size encoding.

use crate::{BlockHash, ChainError, ChainResult};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

/// Encoded header size in bytes.
pub const HEADER_SIZE: usize = 4 + 32 + 32 + 4 + 8 + 8 + 8 + 32;

/// Proof-of-capacity block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Header format version.
    pub version: i32,
    /// Hash of the parent block (zero for genesis).
    pub prev_hash: BlockHash,
    /// Merkle root of the block's transactions.
    pub merkle_root: [u8; 32],
    /// Block time, seconds since the epoch.
    pub timestamp: u32,
    /// Base target the block was mined against.
    pub base_target: u64,
    /// Plotter (miner) account id.
    pub plotter_id: u64,
    /// Plot nonce that produced the deadline.
    pub nonce: u64,
    /// Generation signature of the parent, carried forward as this block's seed.
    pub signature: [u8; 32],
}

impl BlockHeader {
    /// Serialize to the fixed little-endian layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.prev_hash.as_bytes());
        buf.extend_from_slice(&self.merkle_root);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.base_target.to_le_bytes());
        buf.extend_from_slice(&self.plotter_id.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.signature);
        buf
    }

    /// Parse from the fixed little-endian layout.
    pub fn from_bytes(data: &[u8]) -> ChainResult<Self> {
        if data.len() != HEADER_SIZE {
            return Err(ChainError::InvalidHeader(format!(
                "expected {} bytes, got {}",
                HEADER_SIZE,
                data.len()
            )));
        }

        let version = i32::from_le_bytes(fixed(&data[0..4]));
        let prev_hash = BlockHash(fixed(&data[4..36]));
        let merkle_root = fixed(&data[36..68]);
        let timestamp = u32::from_le_bytes(fixed(&data[68..72]));
        let base_target = u64::from_le_bytes(fixed(&data[72..80]));
        let plotter_id = u64::from_le_bytes(fixed(&data[80..88]));
        let nonce = u64::from_le_bytes(fixed(&data[88..96]));
        let signature = fixed(&data[96..128]);

        Ok(Self {
            version,
            prev_hash,
            merkle_root,
            timestamp,
            base_target,
            plotter_id,
            nonce,
            signature,
        })
    }

    /// Block hash: Blake2b-256 of the encoded header.
    pub fn hash(&self) -> BlockHash {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(self.to_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        BlockHash(out)
    }
}

fn fixed<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut arr = [0u8; N];
    arr.copy_from_slice(slice);
    arr
}
