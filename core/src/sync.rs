//! Spinning reader/writer lock.
//!
//! [`SpinRwLock`] guards the renderer's hot shared maps (pipeline caches,
//! render stacks). Those are read by every recording worker on every draw
//! and written rarely, so the lock is read-biased: a waiting writer does not
//! block new readers.
//!
//! # State encoding
//!
//! - `0`: unlocked
//! - positive N: N active readers
//! - `-1`: one active writer

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI32, Ordering};

const WRITER: i32 = -1;
const UNLOCKED: i32 = 0;

/// A read-biased reader/writer spinlock.
pub struct SpinRwLock<T> {
    state: AtomicI32,
    data: UnsafeCell<T>,
}

// SAFETY: The lock synchronizes access to `T` via atomic operations.
// `T: Send` is required because the data can move between threads.
// `T: Sync` is required because multiple readers may access `&T` concurrently.
unsafe impl<T: Send> Send for SpinRwLock<T> {}
unsafe impl<T: Send + Sync> Sync for SpinRwLock<T> {}

impl<T> SpinRwLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicI32::new(UNLOCKED),
            data: UnsafeCell::new(value),
        }
    }

    /// Try to take a shared lock. Fails only while a writer holds the lock.
    pub fn try_read(&self) -> Option<SpinReadGuard<'_, T>> {
        loop {
            let current = self.state.load(Ordering::Relaxed);
            if current == WRITER {
                return None;
            }
            if self
                .state
                .compare_exchange_weak(current, current + 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Some(SpinReadGuard { lock: self });
            }
        }
    }

    /// Try to take the exclusive lock. Fails while any reader or writer is active.
    pub fn try_write(&self) -> Option<SpinWriteGuard<'_, T>> {
        self.state
            .compare_exchange(UNLOCKED, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinWriteGuard { lock: self })
    }

    /// Spin until a shared lock is acquired.
    pub fn read(&self) -> SpinReadGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_read() {
                return guard;
            }
            while self.state.load(Ordering::Relaxed) == WRITER {
                std::hint::spin_loop();
            }
        }
    }

    /// Spin until the exclusive lock is acquired.
    pub fn write(&self) -> SpinWriteGuard<'_, T> {
        let mut spins = 0u32;
        loop {
            if let Some(guard) = self.try_write() {
                return guard;
            }
            while self.state.load(Ordering::Relaxed) != UNLOCKED {
                spins = spins.wrapping_add(1);
                if spins % 64 == 0 {
                    std::thread::yield_now();
                } else {
                    std::hint::spin_loop();
                }
            }
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Mutable access without locking; `&mut self` proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for SpinRwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for SpinRwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_read() {
            Some(guard) => f.debug_struct("SpinRwLock").field("data", &*guard).finish(),
            None => f
                .debug_struct("SpinRwLock")
                .field("data", &"<locked>")
                .finish(),
        }
    }
}

/// Shared guard returned by [`SpinRwLock::read`].
pub struct SpinReadGuard<'a, T> {
    lock: &'a SpinRwLock<T>,
}

impl<T> Deref for SpinReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Holding a read guard means no writer is active.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for SpinReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(1, Ordering::Release);
    }
}

/// Exclusive guard returned by [`SpinRwLock::write`].
pub struct SpinWriteGuard<'a, T> {
    lock: &'a SpinRwLock<T>,
}

impl<T> Deref for SpinWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Holding the write guard means exclusive access.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: Holding the write guard means exclusive access.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.store(UNLOCKED, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_many_readers() {
        let lock = SpinRwLock::new(5);
        let a = lock.read();
        let b = lock.read();
        assert_eq!(*a + *b, 10);
        assert!(lock.try_write().is_none());
    }

    #[test]
    fn test_writer_excludes_readers() {
        let lock = SpinRwLock::new(Vec::<u32>::new());
        {
            let mut w = lock.write();
            w.push(1);
            assert!(lock.try_read().is_none());
        }
        assert_eq!(lock.read().len(), 1);
    }

    #[test]
    fn test_concurrent_increments() {
        let lock = Arc::new(SpinRwLock::new(0u64));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.write() += 1;
                        let _ = *lock.read();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(*lock.read(), 4000);
    }
}
