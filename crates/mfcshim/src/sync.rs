// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

// A poisoned lock only means another thread panicked while holding it; the
// protected counters stay consistent, so recover the guard.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counting semaphore.
///
/// `post` increments the count and wakes one waiter, `wait` blocks until the
/// count is non-zero and then decrements it.
#[derive(Debug, Default)]
pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    pub fn post(&self) {
        let mut count = lock(&self.count);
        *count += 1;
        self.cond.notify_one();
    }

    pub fn wait(&self) {
        let mut count = lock(&self.count);
        while *count == 0 {
            count = self
                .cond
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *count -= 1;
    }

    /// Decrement without blocking. Returns false if the count was zero.
    pub fn try_wait(&self) -> bool {
        let mut count = lock(&self.count);
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    pub fn count(&self) -> usize {
        *lock(&self.count)
    }

    /// Post only if nobody holds a pending token, so repeated wake-ups do not
    /// accumulate.
    pub fn post_if_zero(&self) {
        let mut count = lock(&self.count);
        if *count == 0 {
            *count = 1;
            self.cond.notify_one();
        }
    }

    pub fn reset(&self) {
        *lock(&self.count) = 0;
    }
}

/// Manual-reset event.
///
/// Once set, every `wait` returns immediately until `reset` is called.
#[derive(Debug, Default)]
pub struct Signal {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut set = lock(&self.set);
        *set = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *lock(&self.set) = false;
    }

    pub fn wait(&self) {
        let mut set = lock(&self.set);
        while !*set {
            set = self.cond.wait(set).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn is_set(&self) -> bool {
        *lock(&self.set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_semaphore_counts() {
        let sem = Semaphore::new(0);
        assert!(!sem.try_wait());
        sem.post();
        sem.post();
        assert_eq!(sem.count(), 2);
        sem.wait();
        assert!(sem.try_wait());
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn test_semaphore_post_if_zero() {
        let sem = Semaphore::new(0);
        sem.post_if_zero();
        sem.post_if_zero();
        assert_eq!(sem.count(), 1);
        sem.post();
        sem.reset();
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn test_semaphore_wakes_waiter() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.wait())
        };
        thread::sleep(Duration::from_millis(20));
        sem.post();
        waiter.join().unwrap();
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn test_signal_manual_reset() {
        let signal = Arc::new(Signal::new());
        assert!(!signal.is_set());

        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                signal.wait();
                signal.wait();
            })
        };
        thread::sleep(Duration::from_millis(20));
        signal.set();
        waiter.join().unwrap();

        assert!(signal.is_set());
        signal.reset();
        assert!(!signal.is_set());
    }
}
