//! Bucketed stake tables backed by one shared slab pool.
//!
//! The ledger keeps a base table (state at the snapshot height) and two
//! overlay generations holding deltas of the blocks applied since. Records
//! move between tables by handle; the pool is the only owner.

use crate::pool::{Handle, PoolError, PoolStats, SlabPool};
use crate::rules::StakeAddress;
use tracing::trace;

/// Number of hash buckets per table.
pub const BUCKET_COUNT: usize = 1024;

/// Address and value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeRecord {
    pub address: StakeAddress,
    pub value: i64,
}

/// Bucket of an address: 32-bit FNV-1a of its bytes.
pub fn bucket_of(address: &str) -> usize {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in address.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash as usize % BUCKET_COUNT
}

/// Table a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Base,
    Overlay(usize),
}

#[derive(Debug)]
struct Table {
    buckets: Vec<Vec<Handle>>,
    len: usize,
}

impl Table {
    fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); BUCKET_COUNT],
            len: 0,
        }
    }

    fn position(
        &self,
        pool: &SlabPool<StakeRecord>,
        bucket: usize,
        address: &str,
    ) -> Option<usize> {
        self.buckets[bucket].iter().position(|handle| {
            pool.get(*handle)
                .map_or(false, |record| record.address.as_str() == address)
        })
    }

    fn find(&self, pool: &SlabPool<StakeRecord>, bucket: usize, address: &str) -> Option<Handle> {
        self.position(pool, bucket, address)
            .map(|index| self.buckets[bucket][index])
    }

    fn push(&mut self, bucket: usize, handle: Handle) {
        self.buckets[bucket].push(handle);
        self.len += 1;
    }

    fn remove(&mut self, bucket: usize, index: usize) -> Handle {
        self.len -= 1;
        self.buckets[bucket].swap_remove(index)
    }
}

/// Outcome of merging an overlay into the base table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeSummary {
    /// Overlay records summed into an existing base record.
    pub summed: usize,
    /// Base records dropped for a non-positive value.
    pub deleted: usize,
    /// Overlay records moved into the base table.
    pub promoted: usize,
}

/// Record counts of every table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableStats {
    pub base_records: usize,
    pub overlay_records: [usize; 2],
    pub pool: PoolStats,
}

/// Base table plus two overlay generations.
#[derive(Debug)]
pub struct StakeTables {
    pool: SlabPool<StakeRecord>,
    base: Table,
    overlays: [Table; 2],
}

impl StakeTables {
    /// Create empty tables; `max_records` caps the pool.
    pub fn new(max_records: Option<usize>) -> Self {
        Self {
            pool: SlabPool::new(max_records),
            base: Table::new(),
            overlays: [Table::new(), Table::new()],
        }
    }

    fn table(&self, layer: Layer) -> &Table {
        match layer {
            Layer::Base => &self.base,
            Layer::Overlay(generation) => &self.overlays[generation % 2],
        }
    }

    fn table_mut(&mut self, layer: Layer) -> (&mut Table, &mut SlabPool<StakeRecord>) {
        let table = match layer {
            Layer::Base => &mut self.base,
            Layer::Overlay(generation) => &mut self.overlays[generation % 2],
        };
        (table, &mut self.pool)
    }

    /// Add `delta` to the record of `address` in `layer`, creating it if needed.
    pub fn add(
        &mut self,
        layer: Layer,
        address: &StakeAddress,
        delta: i64,
    ) -> Result<i64, PoolError> {
        let bucket = bucket_of(address.as_str());
        let (table, pool) = self.table_mut(layer);

        if let Some(handle) = table.find(pool, bucket, address.as_str()) {
            if let Some(record) = pool.get_mut(handle) {
                record.value = record.value.wrapping_add(delta);
                return Ok(record.value);
            }
        }

        let handle = pool.allocate(StakeRecord {
            address: address.clone(),
            value: delta,
        })?;
        table.push(bucket, handle);
        Ok(delta)
    }

    /// Apply every change to `layer`, or none of them.
    ///
    /// On pool exhaustion the changes already made are reverted and records
    /// created along the way are released.
    pub fn add_all(
        &mut self,
        layer: Layer,
        changes: &[(StakeAddress, i64)],
    ) -> Result<(), PoolError> {
        let mut created = Vec::new();
        for (applied, (address, delta)) in changes.iter().enumerate() {
            let existed = self.value(layer, address.as_str()).is_some();
            if let Err(err) = self.add(layer, address, *delta) {
                for (address, delta) in changes[..applied].iter().rev() {
                    let _ = self.add(layer, address, delta.wrapping_neg());
                }
                for address in created {
                    self.release(layer, address);
                }
                return Err(err);
            }
            if !existed {
                created.push(address.as_str());
            }
        }
        Ok(())
    }

    fn release(&mut self, layer: Layer, address: &str) {
        let bucket = bucket_of(address);
        let (table, pool) = self.table_mut(layer);
        if let Some(index) = table.position(pool, bucket, address) {
            pool.free(table.remove(bucket, index));
        }
    }

    /// Value of `address` in one table.
    pub fn value(&self, layer: Layer, address: &str) -> Option<i64> {
        let table = self.table(layer);
        table
            .find(&self.pool, bucket_of(address), address)
            .and_then(|handle| self.pool.get(handle))
            .map(|record| record.value)
    }

    /// Sum over the base table and both overlays.
    pub fn stake(&self, address: &str) -> i64 {
        [Layer::Base, Layer::Overlay(0), Layer::Overlay(1)]
            .into_iter()
            .filter_map(|layer| self.value(layer, address))
            .fold(0i64, i64::wrapping_add)
    }

    /// Fold overlay `generation` into the base table and empty it.
    pub fn merge_overlay(&mut self, generation: usize) -> MergeSummary {
        let generation = generation % 2;
        let mut summary = MergeSummary::default();
        let pool = &mut self.pool;
        let base = &mut self.base;
        let overlay = &mut self.overlays[generation];

        for bucket in 0..BUCKET_COUNT {
            let mut index = 0;
            while index < base.buckets[bucket].len() {
                let handle = base.buckets[bucket][index];
                let Some(address) = pool.get(handle).map(|r| r.address.clone()) else {
                    base.remove(bucket, index);
                    continue;
                };

                if let Some(position) = overlay.position(pool, bucket, address.as_str()) {
                    let merged = overlay.remove(bucket, position);
                    if let Some(delta) = pool.free(merged) {
                        if let Some(record) = pool.get_mut(handle) {
                            trace!(
                                %address,
                                value = record.value,
                                delta = delta.value,
                                "Merging overlay record"
                            );
                            record.value = record.value.wrapping_add(delta.value);
                        }
                        summary.summed += 1;
                    }
                }

                if pool.get(handle).map_or(true, |record| record.value <= 0) {
                    pool.free(base.remove(bucket, index));
                    summary.deleted += 1;
                } else {
                    index += 1;
                }
            }

            for handle in std::mem::take(&mut overlay.buckets[bucket]) {
                overlay.len -= 1;
                match pool.get(handle) {
                    Some(record) if record.value != 0 => {
                        base.push(bucket, handle);
                        summary.promoted += 1;
                    }
                    _ => {
                        pool.free(handle);
                    }
                }
            }
        }

        summary
    }

    /// Drop every overlay record.
    pub fn clear_overlays(&mut self) {
        for overlay in &mut self.overlays {
            for bucket in &mut overlay.buckets {
                for handle in bucket.drain(..) {
                    self.pool.free(handle);
                }
            }
            overlay.len = 0;
        }
    }

    /// Base records in bucket order.
    pub fn base_records(&self) -> impl Iterator<Item = &StakeRecord> + '_ {
        self.base
            .buckets
            .iter()
            .flatten()
            .filter_map(|handle| self.pool.get(*handle))
    }

    /// Current record counts.
    pub fn stats(&self) -> TableStats {
        TableStats {
            base_records: self.base.len,
            overlay_records: [self.overlays[0].len, self.overlays[1].len],
            pool: self.pool.stats(),
        }
    }
}
