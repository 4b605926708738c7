//! Ring Buffer Implementation

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Default buffer capacity (200 adapter log lines)
pub const DEFAULT_CAPACITY: usize = 200;

/// Bounded ring buffer, safe to share between tasks
pub struct RingBuffer<T> {
    /// Stored items, oldest first
    storage: Mutex<VecDeque<T>>,
    /// Capacity of the buffer
    capacity: usize,
    /// Total items written (for statistics)
    total_written: AtomicUsize,
}

impl<T: Clone> RingBuffer<T> {
    /// Create a new ring buffer with given capacity (at least one slot)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            storage: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            total_written: AtomicUsize::new(0),
        }
    }

    /// Create a buffer with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // A panicking writer cannot leave the deque half-updated
        self.storage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Push an item (overwrites oldest if full)
    pub fn push(&self, item: T) {
        let mut storage = self.lock();
        if storage.len() == self.capacity {
            storage.pop_front();
        }
        storage.push_back(item);
        self.total_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the number of items currently in the buffer
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if buffer is full
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    /// Read the last N items (most recent first)
    pub fn read_last(&self, count: usize) -> Vec<T> {
        self.lock().iter().rev().take(count).cloned().collect()
    }

    /// Copy of every stored item, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }

    /// Get total items written (for statistics)
    pub fn total_written(&self) -> usize {
        self.total_written.load(Ordering::Relaxed)
    }

    /// Clear the buffer
    pub fn clear(&self) {
        self.lock().clear();
    }
}
