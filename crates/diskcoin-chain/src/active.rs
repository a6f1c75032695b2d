//! Height-indexed view of the active chain.

use crate::{BlockHash, BlockTree, NodeId};
use tracing::debug;

/// Locator entries collected before the step starts doubling.
const LOCATOR_DENSE_ENTRIES: usize = 10;

/// The active chain: `chain[h]` is the active block at height `h`.
#[derive(Debug, Clone, Default)]
pub struct ActiveChain {
    chain: Vec<NodeId>,
}

impl ActiveChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `tip` the active tip, or clear the chain with `None`.
    ///
    /// Entries shared with the previous chain are left in place; the walk
    /// from the new tip stops at the first entry that is already correct.
    pub fn set_tip(&mut self, tree: &BlockTree, tip: Option<NodeId>) {
        let Some(tip) = tip else {
            self.chain.clear();
            return;
        };

        let height = tree[tip].height as usize;
        self.chain.resize(height + 1, tip);
        self.chain[height] = tip;

        let mut rewritten = 1usize;
        let mut walk = tree[tip].parent;
        while let Some(id) = walk {
            let h = tree[id].height as usize;
            if self.chain[h] == id {
                break;
            }
            self.chain[h] = id;
            rewritten += 1;
            walk = tree[id].parent;
        }

        debug!(height, rewritten, tip = %tree[tip].hash, "Active chain tip updated");
    }

    /// Current tip.
    pub fn tip(&self) -> Option<NodeId> {
        self.chain.last().copied()
    }

    /// Genesis of the active chain.
    pub fn genesis(&self) -> Option<NodeId> {
        self.chain.first().copied()
    }

    /// Height of the tip, `None` when empty.
    pub fn height(&self) -> Option<u32> {
        self.chain.len().checked_sub(1).map(|h| h as u32)
    }

    /// Active block at `height`.
    pub fn at(&self, height: u32) -> Option<NodeId> {
        self.chain.get(height as usize).copied()
    }

    /// Whether `id` is part of the active chain.
    pub fn contains(&self, tree: &BlockTree, id: NodeId) -> bool {
        tree.node(id)
            .map(|node| self.at(node.height) == Some(id))
            .unwrap_or(false)
    }

    /// Successor of `id` on the active chain.
    pub fn next(&self, tree: &BlockTree, id: NodeId) -> Option<NodeId> {
        if self.contains(tree, id) {
            self.at(tree[id].height + 1)
        } else {
            None
        }
    }

    /// Highest ancestor of `id` (possibly `id` itself) on the active chain.
    pub fn find_fork(&self, tree: &BlockTree, id: NodeId) -> Option<NodeId> {
        let chain_height = self.height()?;
        let mut walk = if tree.node(id)?.height > chain_height {
            tree.ancestor(id, chain_height)
        } else {
            Some(id)
        };
        while let Some(candidate) = walk {
            if self.contains(tree, candidate) {
                return Some(candidate);
            }
            walk = tree[candidate].parent;
        }
        None
    }

    /// Sparse list of ancestor hashes for peer synchronization.
    ///
    /// Starts at `from` (the tip when `None`), steps back by 1 for the first
    /// entries and then by doubling steps, and always ends with genesis.
    pub fn locator(&self, tree: &BlockTree, from: Option<NodeId>) -> Vec<BlockHash> {
        let mut have = Vec::with_capacity(32);
        let mut step = 1u32;
        let mut walk = from.or_else(|| self.tip());

        while let Some(id) = walk {
            let node = &tree[id];
            have.push(node.hash);
            if node.height == 0 {
                break;
            }

            let height = node.height.saturating_sub(step);
            walk = if self.contains(tree, id) {
                self.at(height)
            } else {
                tree.ancestor(id, height)
            };

            if have.len() > LOCATOR_DENSE_ENTRIES {
                step *= 2;
            }
        }

        have
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlockHeader;

    fn extend(tree: &mut BlockTree, from: Option<NodeId>, count: u32, salt: u64) -> Vec<NodeId> {
        let mut prev = from.map(|id| tree[id].hash).unwrap_or(BlockHash::ZERO);
        let mut ids = Vec::new();
        for i in 0..count {
            let header = BlockHeader {
                version: 1,
                prev_hash: prev,
                merkle_root: [0u8; 32],
                timestamp: i,
                base_target: 1,
                plotter_id: salt,
                nonce: u64::from(i),
                signature: [0u8; 32],
            };
            let id = tree.insert(&header).unwrap();
            prev = tree[id].hash;
            ids.push(id);
        }
        ids
    }

    #[test]
    fn test_set_tip_indexes_every_height() {
        let mut tree = BlockTree::new();
        let ids = extend(&mut tree, None, 20, 0);
        let mut chain = ActiveChain::new();
        chain.set_tip(&tree, ids.last().copied());

        assert_eq!(chain.height(), Some(19));
        for (h, id) in ids.iter().enumerate() {
            assert_eq!(chain.at(h as u32), Some(*id));
            assert!(chain.contains(&tree, *id));
        }
        assert_eq!(chain.genesis(), Some(ids[0]));
    }

    #[test]
    fn test_set_tip_none_clears() {
        let mut tree = BlockTree::new();
        let ids = extend(&mut tree, None, 5, 0);
        let mut chain = ActiveChain::new();
        chain.set_tip(&tree, ids.last().copied());
        chain.set_tip(&tree, None);
        assert_eq!(chain.height(), None);
        assert!(chain.tip().is_none());
    }

    #[test]
    fn test_reorg_to_shorter_branch() {
        let mut tree = BlockTree::new();
        let main = extend(&mut tree, None, 30, 0);
        let branch = extend(&mut tree, Some(main[10]), 5, 1);

        let mut chain = ActiveChain::new();
        chain.set_tip(&tree, main.last().copied());
        chain.set_tip(&tree, branch.last().copied());

        assert_eq!(chain.height(), Some(15));
        assert_eq!(chain.at(10), Some(main[10]));
        assert_eq!(chain.at(11), Some(branch[0]));
        assert!(!chain.contains(&tree, main[11]));
        assert!(!chain.contains(&tree, main[29]));
    }

    #[test]
    fn test_find_fork() {
        let mut tree = BlockTree::new();
        let main = extend(&mut tree, None, 30, 0);
        let branch = extend(&mut tree, Some(main[12]), 40, 1);

        let mut chain = ActiveChain::new();
        chain.set_tip(&tree, main.last().copied());

        assert_eq!(chain.find_fork(&tree, *branch.last().unwrap()), Some(main[12]));
        assert_eq!(chain.find_fork(&tree, branch[0]), Some(main[12]));
        assert_eq!(chain.find_fork(&tree, main[29]), Some(main[29]));
        assert_eq!(chain.find_fork(&tree, main[5]), Some(main[5]));
    }

    #[test]
    fn test_next() {
        let mut tree = BlockTree::new();
        let main = extend(&mut tree, None, 10, 0);
        let branch = extend(&mut tree, Some(main[4]), 2, 1);
        let mut chain = ActiveChain::new();
        chain.set_tip(&tree, main.last().copied());

        assert_eq!(chain.next(&tree, main[3]), Some(main[4]));
        assert_eq!(chain.next(&tree, main[9]), None);
        assert_eq!(chain.next(&tree, branch[0]), None);
    }

    #[test]
    fn test_locator_shape() {
        let mut tree = BlockTree::new();
        let ids = extend(&mut tree, None, 1_000, 0);
        let mut chain = ActiveChain::new();
        chain.set_tip(&tree, ids.last().copied());

        let locator = chain.locator(&tree, None);
        assert_eq!(locator[0], tree[ids[999]].hash);
        assert_eq!(*locator.last().unwrap(), tree[ids[0]].hash);
        for i in 0..10 {
            assert_eq!(locator[i], tree[ids[999 - i]].hash);
        }
        // 11 dense entries, then doubling steps down to genesis.
        assert!(locator.len() < 30);
    }

    #[test]
    fn test_locator_from_side_branch_uses_skip_list() {
        let mut tree = BlockTree::new();
        let main = extend(&mut tree, None, 200, 0);
        let branch = extend(&mut tree, Some(main[100]), 50, 1);
        let mut chain = ActiveChain::new();
        chain.set_tip(&tree, main.last().copied());

        let locator = chain.locator(&tree, branch.last().copied());
        assert_eq!(locator[0], tree[*branch.last().unwrap()].hash);
        assert_eq!(*locator.last().unwrap(), tree[main[0]].hash);
    }
}
