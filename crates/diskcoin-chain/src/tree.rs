//! Block tree arena and skip-list ancestor lookup.

use crate::{BlockHash, BlockHeader, ChainError, ChainResult};
use std::collections::HashMap;
use std::ops::Index;
use tracing::{debug, trace};

/// Index of a node inside a [`BlockTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position in the arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// One known block.
///
/// Parent and skip links are indices into the owning tree. Both are fixed
/// when the node is inserted.
#[derive(Debug, Clone)]
pub struct ChainNode {
    /// Height above genesis.
    pub height: u32,
    /// Block hash.
    pub hash: BlockHash,
    /// Parent node, `None` only for genesis.
    pub parent: Option<NodeId>,
    /// Ancestor at `skip_height(height)`.
    pub skip: Option<NodeId>,
    /// Block time in seconds.
    pub timestamp: u32,
    /// Base target declared by the block.
    pub base_target: u64,
    /// Plotter account id.
    pub plotter_id: u64,
    /// 32-byte signature seed from the header.
    pub signature: [u8; 32],
}

/// Clear the lowest set bit.
fn invert_lowest_one(n: u32) -> u32 {
    n & n.wrapping_sub(1)
}

/// Height a node at `height` links to with its skip pointer.
///
/// Any height strictly below `height` would be valid; this choice keeps
/// ancestor walks short (about 110 hops to go back 2^18 blocks).
pub fn skip_height(height: u32) -> u32 {
    if height < 2 {
        return 0;
    }
    if height & 1 == 1 {
        invert_lowest_one(invert_lowest_one(height - 1)) + 1
    } else {
        invert_lowest_one(height)
    }
}

/// Arena owning every known block, keyed by hash.
#[derive(Debug, Default)]
pub struct BlockTree {
    nodes: Vec<ChainNode>,
    by_hash: HashMap<BlockHash, NodeId>,
    genesis: Option<NodeId>,
}

impl BlockTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if no block has been inserted.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Genesis node, once inserted.
    pub fn genesis(&self) -> Option<NodeId> {
        self.genesis
    }

    /// Look up a node by block hash.
    pub fn get(&self, hash: &BlockHash) -> Option<NodeId> {
        self.by_hash.get(hash).copied()
    }

    /// Look up a node by id.
    pub fn node(&self, id: NodeId) -> Option<&ChainNode> {
        self.nodes.get(id.0)
    }

    /// Parent of a node.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    /// Insert a header, linking it to its parent and building its skip link.
    ///
    /// Inserting a known header is a no-op that returns the existing id.
    pub fn insert(&mut self, header: &BlockHeader) -> ChainResult<NodeId> {
        let hash = header.hash();
        if let Some(existing) = self.get(&hash) {
            debug!(%hash, "Header already indexed, skipping");
            return Ok(existing);
        }

        let (height, parent, skip) = if header.prev_hash.is_zero() {
            if let Some(genesis) = self.genesis {
                return Err(ChainError::GenesisMismatch {
                    existing: self.nodes[genesis.0].hash,
                    offered: hash,
                });
            }
            (0, None, None)
        } else {
            let parent = self
                .get(&header.prev_hash)
                .ok_or(ChainError::UnknownParent(header.prev_hash))?;
            let parent_height = self.nodes[parent.0].height;
            let height = parent_height
                .checked_add(1)
                .ok_or(ChainError::HeightOverflow(u64::from(parent_height) + 1))?;
            let skip = self.ancestor(parent, skip_height(height));
            (height, Some(parent), skip)
        };

        let id = NodeId(self.nodes.len());
        self.nodes.push(ChainNode {
            height,
            hash,
            parent,
            skip,
            timestamp: header.timestamp,
            base_target: header.base_target,
            plotter_id: header.plotter_id,
            signature: header.signature,
        });
        self.by_hash.insert(hash, id);
        if parent.is_none() {
            self.genesis = Some(id);
        }

        trace!(height, %hash, "Indexed header");
        Ok(id)
    }

    /// Ancestor of `id` at `height`, or `None` when `height` is above the node.
    pub fn ancestor(&self, id: NodeId, height: u32) -> Option<NodeId> {
        self.walk_to(id, height).map(|(found, _)| found)
    }

    /// Skip-list walk, returning the ancestor and the number of hops taken.
    fn walk_to(&self, id: NodeId, height: u32) -> Option<(NodeId, usize)> {
        let start = self.nodes.get(id.0)?;
        if height > start.height {
            return None;
        }

        let mut walk = id;
        let mut walk_height = start.height;
        let mut hops = 0usize;
        while walk_height > height {
            let node = &self.nodes[walk.0];
            let height_skip = skip_height(walk_height);
            let height_skip_prev = skip_height(walk_height - 1);

            // Only follow the skip link if the parent's skip is not better.
            let take_skip = height_skip == height
                || (height_skip > height
                    && !(height_skip_prev + 2 < height_skip && height_skip_prev >= height));

            match node.skip {
                Some(skip) if take_skip => {
                    walk = skip;
                    walk_height = height_skip;
                }
                _ => {
                    walk = node.parent?;
                    walk_height -= 1;
                }
            }
            hops += 1;
        }
        Some((walk, hops))
    }

    /// Highest block that is an ancestor of (or equal to) both nodes.
    pub fn common_ancestor(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let height_a = self.nodes.get(a.0)?.height;
        let height_b = self.nodes.get(b.0)?.height;
        let common = height_a.min(height_b);

        let mut a = self.ancestor(a, common)?;
        let mut b = self.ancestor(b, common)?;
        while a != b {
            match (self.nodes[a.0].skip, self.nodes[b.0].skip) {
                (Some(skip_a), Some(skip_b)) if skip_a != skip_b => {
                    a = skip_a;
                    b = skip_b;
                }
                _ => {
                    a = self.nodes[a.0].parent?;
                    b = self.nodes[b.0].parent?;
                }
            }
        }
        Some(a)
    }
}

impl Index<NodeId> for BlockTree {
    type Output = ChainNode;

    fn index(&self, id: NodeId) -> &ChainNode {
        &self.nodes[id.0]
    }
}
