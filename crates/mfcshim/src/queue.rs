// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::sync::{lock, Semaphore};

/// Maximum number of buffers waiting on one port.
pub const MAX_QUEUE_ELEMENTS: usize = 10;

/// Bounded FIFO of buffers awaiting processing on a port.
///
/// Every successful enqueue posts the semaphore; `dequeue` blocks on it and
/// then pops under the mutex. A wake-up without an element (shutdown, flush)
/// makes `dequeue` return `None`.
#[derive(Debug)]
pub struct PendingQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Semaphore,
    capacity: usize,
}

impl<T> PendingQueue<T> {
    pub fn new() -> Self {
        Self::with_capacity(MAX_QUEUE_ELEMENTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Semaphore::new(0),
            capacity,
        }
    }

    /// Append `item`, handing it back if the queue is full.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        let mut items = lock(&self.items);
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        drop(items);
        self.available.post();
        Ok(())
    }

    pub fn dequeue(&self) -> Option<T> {
        self.available.wait();
        lock(&self.items).pop_front()
    }

    pub fn try_dequeue(&self) -> Option<T> {
        if !self.available.try_wait() {
            return None;
        }
        lock(&self.items).pop_front()
    }

    /// Release a thread blocked in `dequeue` without adding an element.
    pub fn wake(&self) {
        self.available.post_if_zero();
    }

    /// Remove every queued element and clear pending wake-ups.
    pub fn drain(&self) -> Vec<T> {
        let mut items = lock(&self.items);
        let drained = items.drain(..).collect();
        self.available.reset();
        drained
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
