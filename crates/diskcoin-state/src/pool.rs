//! Slab pool for fixed-size ledger records.
//!
//! Slots are carved from ladders: ladder 0 holds as many slots as fit in
//! one 4096-byte page (rounded down to a power of two), ladder `k` holds
//! `ladder0 << k` slots. Freed slots go on a free list and are handed out
//! again before any fresh slot is carved. Ladders are only released when
//! the pool is dropped.
//!
//! Handles carry a generation counter so a handle that outlived its value
//! is rejected instead of aliasing whatever reused the slot.

use thiserror::Error;

/// Page size the first ladder is sized against.
pub const PAGE_SIZE: usize = 4096;

/// Maximum number of ladders.
pub const MAX_LADDERS: usize = 20;

/// Slot sizes are rounded up to this alignment.
const SLOT_ALIGN: usize = 16;

/// Largest base exponent for an unbounded pool, so the final ladder still
/// fits a 32-bit slot count.
const MAX_AUTO_BASE_SHIFT: u32 = 31 - MAX_LADDERS as u32;

/// Pool allocation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Every slot is in use and no further ladder may be opened.
    #[error("Slab pool exhausted ({capacity} slots)")]
    Exhausted { capacity: usize },
}

/// Reference to a live value in a [`SlabPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    ladder: u8,
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Usage counters of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Bytes accounted per slot, including the free-list entry.
    pub slot_size: usize,
    /// Slots in all opened ladders.
    pub capacity: usize,
    /// Slots holding a value.
    pub live: usize,
    /// Opened ladders.
    pub ladders: usize,
}

/// Ladder-growing arena of `T` values.
#[derive(Debug)]
pub struct SlabPool<T> {
    slot_size: usize,
    base_shift: u32,
    max_count: Option<usize>,
    ladders: Vec<Vec<Slot<T>>>,
    ladder_sizes: Vec<usize>,
    free: Vec<(u8, u32)>,
    capacity: usize,
    live: usize,
}

impl<T> SlabPool<T> {
    /// Create a pool; `max_count` caps the total number of slots.
    pub fn new(max_count: Option<usize>) -> Self {
        let slot_size = align_up(std::mem::size_of::<T>(), SLOT_ALIGN);
        let entry_size = std::mem::size_of::<usize>() + slot_size;

        let mut base_shift = 0u32;
        while base_shift < usize::BITS - 1 && (entry_size << (base_shift + 1)) <= PAGE_SIZE {
            base_shift += 1;
        }
        if max_count.is_none() {
            base_shift = base_shift.min(MAX_AUTO_BASE_SHIFT);
        }

        Self {
            slot_size: entry_size,
            base_shift,
            max_count,
            ladders: Vec::new(),
            ladder_sizes: Vec::new(),
            free: Vec::new(),
            capacity: 0,
            live: 0,
        }
    }

    /// Number of slots in ladder 0.
    pub fn first_ladder_len(&self) -> usize {
        1 << self.base_shift
    }

    /// Store `value`, returning its handle.
    pub fn allocate(&mut self, value: T) -> Result<Handle, PoolError> {
        let (ladder, index) = match self.free.pop() {
            Some(position) => position,
            None => self.carve()?,
        };

        let slot = &mut self.ladders[ladder as usize][index as usize];
        slot.value = Some(value);
        self.live += 1;
        Ok(Handle {
            ladder,
            index,
            generation: slot.generation,
        })
    }

    /// Take an untouched slot from the newest ladder, opening one if needed.
    fn carve(&mut self) -> Result<(u8, u32), PoolError> {
        let needs_ladder = match (self.ladders.last(), self.ladder_sizes.last()) {
            (Some(ladder), Some(&size)) => ladder.len() >= size,
            _ => true,
        };
        if needs_ladder {
            self.open_ladder()?;
        }

        let ladder = self.ladders.len() - 1;
        let slots = &mut self.ladders[ladder];
        let index = slots.len();
        slots.push(Slot {
            generation: 0,
            value: None,
        });
        Ok((ladder as u8, index as u32))
    }

    fn open_ladder(&mut self) -> Result<(), PoolError> {
        let exhausted = PoolError::Exhausted {
            capacity: self.capacity,
        };
        let next = self.ladders.len();
        if next >= MAX_LADDERS {
            return Err(exhausted);
        }

        let mut count = (1usize << next) << self.base_shift;
        if let Some(max) = self.max_count {
            count = count.min(max.saturating_sub(self.capacity));
        }
        if count == 0 {
            return Err(exhausted);
        }

        self.ladders.push(Vec::with_capacity(count));
        self.ladder_sizes.push(count);
        self.capacity += count;
        Ok(())
    }

    /// Release the value behind `handle`.
    ///
    /// Returns `None` for stale, double-freed or foreign handles.
    pub fn free(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slot_mut(handle)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push((handle.ladder, handle.index));
        self.live -= 1;
        Some(value)
    }

    /// Borrow the value behind `handle`.
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.ladders
            .get(handle.ladder as usize)?
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?
            .value
            .as_ref()
    }

    /// Mutably borrow the value behind `handle`.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slot_mut(handle)?.value.as_mut()
    }

    fn slot_mut(&mut self, handle: Handle) -> Option<&mut Slot<T>> {
        self.ladders
            .get_mut(handle.ladder as usize)?
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Check if no value is live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Current usage counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            slot_size: self.slot_size,
            capacity: self.capacity,
            live: self.live,
            ladders: self.ladders.len(),
        }
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_ladder_fits_one_page() {
        // 72-byte payload -> 80 aligned + 8 pointer = 88 bytes; 32 * 88 <= 4096 < 64 * 88.
        let pool: SlabPool<[u8; 72]> = SlabPool::new(None);
        assert_eq!(pool.first_ladder_len(), 32);
        assert_eq!(pool.stats().slot_size, 88);
    }

    #[test]
    fn test_zero_sized_slots() {
        // Only the free-list entry is accounted: 512 * 8 bytes fill the page.
        let pool: SlabPool<()> = SlabPool::new(None);
        assert_eq!(pool.first_ladder_len(), 512);
        assert!(pool.first_ladder_len() <= 1 << MAX_AUTO_BASE_SHIFT);
    }

    #[test]
    fn test_bounded_first_ladder_is_truncated() {
        let mut pool: SlabPool<()> = SlabPool::new(Some(10));
        for _ in 0..10 {
            pool.allocate(()).unwrap();
        }
        assert_eq!(pool.stats().capacity, 10);
        assert!(pool.allocate(()).is_err());
    }

    #[test]
    fn test_ladders_double() {
        let mut pool: SlabPool<[u8; 72]> = SlabPool::new(None);
        for i in 0..(32 + 64 + 1) {
            pool.allocate([i as u8; 72]).unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.ladders, 3);
        assert_eq!(stats.capacity, 32 + 64 + 128);
        assert_eq!(stats.live, 97);
    }

    #[test]
    fn test_free_reuses_slot() {
        let mut pool = SlabPool::new(None);
        let a = pool.allocate(1u64).unwrap();
        let b = pool.allocate(2u64).unwrap();

        assert_eq!(pool.free(a), Some(1));
        let c = pool.allocate(3u64).unwrap();
        assert_eq!(pool.stats().capacity, pool.first_ladder_len());
        assert_eq!(pool.get(c), Some(&3));
        assert_eq!(pool.get(b), Some(&2));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_stale_handle_rejected() {
        let mut pool = SlabPool::new(None);
        let a = pool.allocate(String::from("a")).unwrap();
        assert_eq!(pool.free(a).as_deref(), Some("a"));

        // Double free and access through the old handle.
        assert_eq!(pool.free(a), None);
        assert!(pool.get(a).is_none());

        // Reused slot is not reachable through the old handle.
        let b = pool.allocate(String::from("b")).unwrap();
        assert!(pool.get(a).is_none());
        assert_eq!(pool.get(b).map(String::as_str), Some("b"));
    }

    #[test]
    fn test_max_count_truncates_last_ladder() {
        let mut pool: SlabPool<[u8; 72]> = SlabPool::new(Some(40));
        let handles: Vec<_> = (0..40).map(|_| pool.allocate([0u8; 72]).unwrap()).collect();
        assert_eq!(pool.stats().capacity, 40);
        assert_eq!(pool.stats().ladders, 2);
        assert_eq!(
            pool.allocate([0u8; 72]),
            Err(PoolError::Exhausted { capacity: 40 })
        );

        pool.free(handles[7]);
        assert!(pool.allocate([1u8; 72]).is_ok());
    }

    #[test]
    fn test_get_mut_updates_value() {
        let mut pool = SlabPool::new(Some(4));
        let h = pool.allocate(10i64).unwrap();
        *pool.get_mut(h).unwrap() += 5;
        assert_eq!(pool.get(h), Some(&15));
    }
}
