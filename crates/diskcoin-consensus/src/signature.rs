//! Generation signature.

use crate::{ConsensusError, ConsensusResult};
use diskcoin_chain::{BlockTree, ChainNode, NodeId};
use shabal::{Digest, Shabal256};

/// Bytes fed to the hash: seed (32) + plotter id (8) + block hash (32).
pub const SIGNATURE_INPUT_LEN: usize = 32 + 8 + 32;

/// Generation signature of a block.
///
/// Hashes the signature seed carried in the block's header (itself the
/// parent's generation signature), the little-endian plotter id, and the
/// block hash.
pub fn generation_signature(node: &ChainNode) -> [u8; 32] {
    // The reference layout reserves one trailing zero byte that is never hashed.
    let mut data = [0u8; SIGNATURE_INPUT_LEN + 1];
    data[..32].copy_from_slice(&node.signature);
    data[32..40].copy_from_slice(&node.plotter_id.to_le_bytes());
    data[40..72].copy_from_slice(node.hash.as_bytes());

    let mut hasher = Shabal256::new();
    hasher.update(&data[..SIGNATURE_INPUT_LEN]);

    let mut signature = [0u8; 32];
    signature.copy_from_slice(&hasher.finalize());
    signature
}

/// Generation signature of the block at `id`.
pub fn generation_signature_of(tree: &BlockTree, id: NodeId) -> ConsensusResult<[u8; 32]> {
    tree.node(id)
        .map(generation_signature)
        .ok_or(ConsensusError::UnknownNode(id.index()))
}
