use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use libwirecrab_dissect::PacketRecord;

/// Bounded packet store
///
/// Records are kept in push order. When full, pushing evicts the oldest record: offset 0
/// always designates the oldest record still retained.
pub struct PacketStore {
    capacity: usize,
    inner: RwLock<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    records: VecDeque<PacketRecord>,
    evicted: u64,
}

impl PacketStore {
    /// Create a store holding at most `capacity` records (at least 1)
    pub fn new(capacity: usize) -> Self {
        PacketStore {
            capacity: capacity.max(1),
            inner: RwLock::new(StoreInner::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest one if the store is full
    pub fn push(&self, record: PacketRecord) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.records.len() >= self.capacity {
            inner.records.pop_front();
            inner.evicted += 1;
        }
        inner.records.push_back(record);
    }

    /// Return at most `limit` records starting at `offset`, in push order
    pub fn get_packets(&self, offset: usize, limit: usize) -> Vec<PacketRecord> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.records.iter().skip(offset).take(limit).cloned().collect()
    }

    /// Return at most `limit` records starting at the absolute `position` (0 for the first
    /// record pushed since the last clear), with the position of the first returned record
    ///
    /// The returned position is greater than `position` when records were evicted before
    /// being read.
    pub fn get_since(&self, position: u64, limit: usize) -> (u64, Vec<PacketRecord>) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let first = position.max(inner.evicted);
        let offset = (first - inner.evicted) as usize;
        let records = inner.records.iter().skip(offset).take(limit).cloned().collect();
        (first, records)
    }

    pub fn count(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).records.len()
    }

    /// Number of records evicted since the last clear
    pub fn evicted(&self) -> u64 {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).evicted
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.records.clear();
        inner.evicted = 0;
    }
}
