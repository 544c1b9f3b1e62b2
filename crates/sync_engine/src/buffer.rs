//! Bounded, time-ordered stream buffer.
//!
//! Uses index-based separation:
//! - HeapRb stores lightweight metadata (timestamp + slab key), oldest first
//! - Slab stores the actual payloads
//!
//! Entries stay sorted by timestamp, so age eviction only ever pops from the
//! front and never removes a newer entry while an older one remains.

use std::fmt;

use contracts::HostTime;
use ringbuf::{traits::*, HeapRb};
use slab::Slab;

/// Lightweight metadata stored in ring buffer
#[derive(Debug, Clone, Copy)]
struct EntryMeta {
    timestamp: HostTime,
    slab_key: usize,
}

/// Result of a nearest-neighbour query
#[derive(Debug)]
pub struct Nearest<'a, T> {
    pub timestamp: HostTime,
    /// |entry − target| in seconds
    pub delta_s: f64,
    pub item: &'a T,
}

/// Bounded buffer of `(HostTime, T)` pairs, oldest first
pub struct StreamBuffer<T> {
    index: HeapRb<EntryMeta>,
    storage: Slab<T>,
    capacity: usize,
    dropped_count: u64,
    evicted_count: u64,
    out_of_order_count: u64,
}

impl<T> fmt::Debug for StreamBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("len", &self.index.occupied_len())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped_count)
            .field("evicted", &self.evicted_count)
            .finish()
    }
}

impl<T> StreamBuffer<T> {
    /// Create a buffer holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            index: HeapRb::new(capacity),
            storage: Slab::with_capacity(capacity),
            capacity,
            dropped_count: 0,
            evicted_count: 0,
            out_of_order_count: 0,
        }
    }

    /// Append an entry
    ///
    /// When full, the oldest entry is dropped first; an incoming entry older
    /// than everything held is itself the oldest and is dropped instead.
    /// An entry older than the newest one is inserted at its ordered position.
    pub fn append(&mut self, timestamp: HostTime, payload: T) {
        if self.index.is_full() {
            if self.oldest().is_some_and(|oldest| timestamp < oldest) {
                self.dropped_count += 1;
                return;
            }
            if let Some(old) = self.index.try_pop() {
                self.storage.remove(old.slab_key);
            }
            self.dropped_count += 1;
        }

        let slab_key = self.storage.insert(payload);
        let meta = EntryMeta {
            timestamp,
            slab_key,
        };

        let in_order = self
            .newest()
            .map_or(true, |newest| timestamp >= newest);
        if in_order {
            let _ = self.index.try_push(meta);
            return;
        }

        // Rebuild index with the late entry in place (only moves metadata)
        self.out_of_order_count += 1;
        let mut metas: Vec<EntryMeta> = self.index.pop_iter().collect();
        let pos = metas.partition_point(|m| m.timestamp <= timestamp);
        metas.insert(pos, meta);
        for m in metas {
            let _ = self.index.try_push(m);
        }
    }

    /// Entry closest to `target`; ties resolve to the earlier entry
    pub fn nearest(&self, target: HostTime) -> Option<Nearest<'_, T>> {
        let mut best: Option<(EntryMeta, f64)> = None;
        for meta in self.index.iter() {
            let delta = meta.timestamp.abs_diff(target);
            // strict `<` keeps the earlier of two equidistant entries
            if best.map_or(true, |(_, d)| delta < d) {
                best = Some((*meta, delta));
            }
        }

        best.and_then(|(meta, delta_s)| {
            self.storage.get(meta.slab_key).map(|item| Nearest {
                timestamp: meta.timestamp,
                delta_s,
                item,
            })
        })
    }

    /// Remove every entry with `now − ts > retention_s`, returning how many
    pub fn evict_older_than(&mut self, now: HostTime, retention_s: f64) -> usize {
        let mut evicted = 0;
        while let Some(front) = self.index.iter().next().copied() {
            if now - front.timestamp <= retention_s {
                break;
            }
            if let Some(old) = self.index.try_pop() {
                self.storage.remove(old.slab_key);
                evicted += 1;
            }
        }
        self.evicted_count += evicted as u64;
        evicted
    }

    /// Remove and return, oldest first, every entry for which `pred` is true
    pub fn take_where<F>(&mut self, mut pred: F) -> Vec<(HostTime, T)>
    where
        F: FnMut(HostTime, &T) -> bool,
    {
        let metas: Vec<EntryMeta> = self.index.pop_iter().collect();
        let mut taken = Vec::new();

        for meta in metas {
            let hit = self
                .storage
                .get(meta.slab_key)
                .is_some_and(|item| pred(meta.timestamp, item));
            if hit {
                taken.push((meta.timestamp, self.storage.remove(meta.slab_key)));
            } else {
                let _ = self.index.try_push(meta);
            }
        }

        taken
    }

    /// Drop everything (counters are kept)
    pub fn clear(&mut self) {
        for meta in self.index.pop_iter() {
            self.storage.remove(meta.slab_key);
        }
    }

    /// Iterate oldest first
    pub fn iter(&self) -> impl Iterator<Item = (HostTime, &T)> + '_ {
        self.index.iter().filter_map(|meta| {
            self.storage
                .get(meta.slab_key)
                .map(|item| (meta.timestamp, item))
        })
    }

    pub fn oldest(&self) -> Option<HostTime> {
        self.index.iter().next().map(|m| m.timestamp)
    }

    pub fn newest(&self) -> Option<HostTime> {
        self.index.iter().last().map(|m| m.timestamp)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.occupied_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries dropped because the buffer was full
    #[inline]
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    /// Entries removed by age eviction
    #[inline]
    pub fn evicted_count(&self) -> u64 {
        self.evicted_count
    }

    #[inline]
    pub fn out_of_order_count(&self) -> u64 {
        self.out_of_order_count
    }
}
