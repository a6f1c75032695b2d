//! Recent block producers.

use std::collections::VecDeque;

/// Coinbase beneficiary of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerEntry {
    pub height: u32,
    pub address: String,
}

/// Bounded list of block producers, oldest first.
#[derive(Debug, Clone)]
pub struct MinerHistory {
    entries: VecDeque<MinerEntry>,
    capacity: usize,
}

impl MinerHistory {
    /// Create a history holding at most `capacity` appended entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Append the producer of a newly applied block, evicting the oldest when full.
    pub fn push_back(&mut self, height: u32, address: String) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(MinerEntry { height, address });
    }

    /// Prepend the producer of an older block.
    pub fn push_front(&mut self, height: u32, address: String) {
        self.entries.push_front(MinerEntry { height, address });
    }

    /// Oldest entry.
    pub fn front(&self) -> Option<&MinerEntry> {
        self.entries.front()
    }

    /// Drop entries above `height`, returning how many were removed.
    pub fn truncate_above(&mut self, height: u32) -> usize {
        let mut removed = 0;
        while self.entries.back().map_or(false, |e| e.height > height) {
            self.entries.pop_back();
            removed += 1;
        }
        removed
    }

    /// The newest `window` entries, newest first.
    pub fn recent(&self, window: usize) -> impl Iterator<Item = &MinerEntry> + '_ {
        self.entries.iter().rev().take(window)
    }

    /// Occurrences of `address` among the newest `window` entries.
    pub fn count(&self, address: &str, window: usize) -> usize {
        self.recent(window).filter(|e| e.address == address).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_back_evicts_oldest() {
        let mut history = MinerHistory::new(3);
        for h in 1..=5 {
            history.push_back(h, format!("m{h}"));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.front().map(|e| e.height), Some(3));
    }

    #[test]
    fn test_count_window() {
        let mut history = MinerHistory::new(10);
        for (h, who) in ["a", "b", "a", "a", "c"].iter().enumerate() {
            history.push_back(h as u32 + 1, who.to_string());
        }
        assert_eq!(history.count("a", 10), 3);
        // Newest two are "c" and "a".
        assert_eq!(history.count("a", 2), 1);
        assert_eq!(history.count("z", 10), 0);
    }

    #[test]
    fn test_truncate_above() {
        let mut history = MinerHistory::new(10);
        history.push_front(2, "x".into());
        for h in 3..=8 {
            history.push_back(h, "y".into());
        }
        assert_eq!(history.truncate_above(5), 3);
        assert_eq!(history.recent(1).next().map(|e| e.height), Some(5));
        assert_eq!(history.front().map(|e| e.height), Some(2));
    }
}
