//! Bounded FIFO cache of previously seen handshake key material.
//!
//! A replayed sample is the signature of an active prober recording and
//! resending a genuine client handshake. The cache remembers the raw
//! key+IV bytes of every accepted handshake; a hit means the connection
//! is starved instead of served.
//!
//! Eviction is strict FIFO, not LRU: membership tests never refresh an
//! entry's position. The cache is process-wide and shared across all
//! connection tasks behind a mutex.

use std::collections::{HashSet, VecDeque};

use crate::handshake::KEY_IV_LEN;

/// Ordered set of previously seen key materials with bounded capacity.
pub struct ReplayCache {
    capacity: usize,
    order: VecDeque<[u8; KEY_IV_LEN]>,
    seen: HashSet<[u8; KEY_IV_LEN]>,
}

impl ReplayCache {
    /// Create a cache that holds at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(4096)),
            seen: HashSet::with_capacity(capacity.min(4096)),
        }
    }

    /// Test whether `key` has been seen before.
    pub fn contains(&self, key: &[u8; KEY_IV_LEN]) -> bool {
        self.seen.contains(key)
    }

    /// Insert `key` if it has not been seen, then evict the oldest entry
    /// while the size exceeds the capacity. Returns whether the key was
    /// fresh.
    ///
    /// Membership and insertion are one operation under the caller's
    /// lock, so two connections presenting identical material can never
    /// both be admitted, and a key can never occupy two queue slots.
    pub fn insert(&mut self, key: [u8; KEY_IV_LEN]) -> bool {
        if !self.seen.insert(key) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
