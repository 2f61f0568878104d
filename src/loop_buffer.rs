//! Recent loop history.
//!
//! A fixed-capacity ring: inserts are O(1) and overwrite the oldest entry once
//! the ring is full. Readers take a shared lock, the single ingest writer an
//! exclusive one.

use std::sync::{PoisonError, RwLock};

use crate::station::types::LoopSample;

/// Default capacity: about 10 minutes of loops at the console's 2.25 second cadence.
pub const DEFAULT_LOOP_CAPACITY: usize = 2 * 135;

/// Loop history used by the server.
pub type LoopBuffer = RingBuffer<LoopSample>;

struct Ring<T> {
    slots: Vec<T>,
    /// Slot the next insert writes.
    next: usize,
}

/// Fixed-capacity ring buffer of the most recently added items.
pub struct RingBuffer<T> {
    capacity: usize,
    ring: RwLock<Ring<T>>,
}

impl<T: Clone> RingBuffer<T> {
    /// Create an empty ring.
    ///
    /// Capacity is clamped to a minimum of 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            tracing::warn!("Ring buffer capacity must be positive. Using capacity 1.");
            1
        } else {
            capacity
        };

        Self {
            capacity,
            ring: RwLock::new(Ring {
                slots: Vec::with_capacity(capacity),
                next: 0,
            }),
        }
    }

    /// Add an item, overwriting the oldest one when full.
    pub fn add(&self, item: T) {
        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        let next = ring.next;
        if ring.slots.len() < self.capacity {
            ring.slots.push(item);
        } else {
            ring.slots[next] = item;
        }
        ring.next = (next + 1) % self.capacity;
    }

    /// Contents, most recent first.
    pub fn snapshot(&self) -> Vec<T> {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        let (older, newer) = ring.slots.split_at(ring.next);
        // `older` ends with the newest item; `newer` holds the oldest once wrapped.
        older.iter().rev().chain(newer.iter().rev()).cloned().collect()
    }

    /// Number of items held and the most recently added one.
    pub fn last(&self) -> (usize, Option<T>) {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        let len = ring.slots.len();
        if len == 0 {
            return (0, None);
        }
        let newest = (ring.next + len - 1) % len;
        (len, Some(ring.slots[newest].clone()))
    }

    pub fn len(&self) -> usize {
        self.ring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_LOOP_CAPACITY)
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
