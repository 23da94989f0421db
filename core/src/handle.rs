//! Typed handles and slot tables.
//!
//! Every renderer resource is addressed by a 32-bit index into a
//! [`HandleTable`]. The reserved value `u32::MAX` is the null handle.
//! Erasing a slot marks it dead without compacting, so indices of the
//! remaining entries never move.
//!
//! # Example
//!
//! ```
//! use umbra_core::handle::{Handle, HandleTable};
//!
//! let mut table = HandleTable::<&str>::new();
//! let a = table.push("a");
//! let b = table.push("b");
//! table.erase(a);
//!
//! assert!(!table.exists(a));
//! assert_eq!(table.get(b), Some(&"b"));
//! assert_eq!(b.raw(), 1);
//! assert!(Handle::<&str>::NULL.is_null());
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Deref, Index};

use fixedbitset::FixedBitSet;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::HandleError;

/// Raw value of the null handle.
pub const NULL_HANDLE: u32 = u32::MAX;

/// A typed index into a [`HandleTable<T>`].
///
/// The type parameter only tags the handle; it does not own a `T`.
pub struct Handle<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// The null handle.
    pub const NULL: Self = Self::from_raw(NULL_HANDLE);

    /// Wrap a raw index. `u32::MAX` becomes the null handle.
    pub const fn from_raw(index: u32) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    /// The raw index, `u32::MAX` for null.
    pub const fn raw(self) -> u32 {
        self.index
    }

    pub const fn is_null(self) -> bool {
        self.index == NULL_HANDLE
    }

    /// The index as an `Option`, `None` for the null handle.
    pub const fn get(self) -> Option<u32> {
        if self.is_null() {
            None
        } else {
            Some(self.index)
        }
    }

    /// Build a handle from an optional index.
    pub fn from_option(index: Option<u32>) -> Self {
        index.map_or(Self::NULL, Self::from_raw)
    }

    /// Reinterpret the handle as pointing into a different table.
    pub const fn cast<U>(self) -> Handle<U> {
        Handle::from_raw(self.index)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::NULL
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Handle(null)")
        } else {
            write!(f, "Handle({})", self.index)
        }
    }
}

impl<T> From<Handle<T>> for Option<u32> {
    fn from(handle: Handle<T>) -> Self {
        handle.get()
    }
}

/// Append-only slot storage with an existence bitmap.
pub struct HandleTable<T> {
    slots: Vec<Option<T>>,
    live: FixedBitSet,
    live_count: usize,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            live: FixedBitSet::new(),
            live_count: 0,
        }
    }

    /// Store a value in a fresh slot at the end of the table.
    pub fn push(&mut self, value: T) -> Handle<T> {
        let index = self.slots.len();
        self.slots.push(Some(value));
        self.live.grow(index + 1);
        self.live.insert(index);
        self.live_count += 1;
        Handle::from_raw(index as u32)
    }

    /// Store a value in the first dead slot, or append if none is free.
    ///
    /// Returns the handle and whether an existing slot was reused. Callers
    /// that key caches by handle use the flag to drop stale entries.
    pub fn push_reusing(&mut self, value: T) -> (Handle<T>, bool) {
        let free = self.live.zeroes().next();
        match free {
            Some(index) if index < self.slots.len() => {
                self.slots[index] = Some(value);
                self.live.insert(index);
                self.live_count += 1;
                (Handle::from_raw(index as u32), true)
            }
            _ => (self.push(value), false),
        }
    }

    /// Mark a slot dead and return its value.
    ///
    /// Erasing a null, out-of-range or already dead handle is a contract
    /// violation: it trips a debug assertion and is logged in release builds.
    pub fn erase(&mut self, handle: Handle<T>) -> Option<T> {
        if let Err(e) = self.check(handle) {
            debug_assert!(false, "erase: {e}");
            log::error!("HandleTable::erase: {e}");
            return None;
        }
        let index = handle.raw() as usize;
        self.live.set(index, false);
        self.live_count -= 1;
        self.slots[index].take()
    }

    pub fn exists(&self, handle: Handle<T>) -> bool {
        !handle.is_null() && self.live.contains(handle.raw() as usize)
    }

    /// Validate a handle against this table.
    pub fn check(&self, handle: Handle<T>) -> Result<(), HandleError> {
        if handle.is_null() {
            return Err(HandleError::Null);
        }
        let index = handle.raw() as usize;
        if index >= self.slots.len() {
            return Err(HandleError::OutOfRange {
                index: handle.raw(),
                len: self.slots.len(),
            });
        }
        if !self.live.contains(index) {
            return Err(HandleError::Destroyed(handle.raw()));
        }
        Ok(())
    }

    /// Look up a live slot. Dead or out-of-range handles log and return `None`.
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        match self.check(handle) {
            Ok(()) => self.slots[handle.raw() as usize].as_ref(),
            Err(HandleError::Null) => None,
            Err(e) => {
                log::error!("HandleTable::get: {e}");
                None
            }
        }
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        match self.check(handle) {
            Ok(()) => self.slots[handle.raw() as usize].as_mut(),
            Err(HandleError::Null) => None,
            Err(e) => {
                log::error!("HandleTable::get_mut: {e}");
                None
            }
        }
    }

    /// Replace the value of a live slot, returning the previous value.
    pub fn set(&mut self, handle: Handle<T>, value: T) -> Result<T, HandleError> {
        self.check(handle)?;
        let slot = &mut self.slots[handle.raw() as usize];
        slot.replace(value).ok_or(HandleError::Destroyed(handle.raw()))
    }

    /// Number of live slots.
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Total slots, live and dead.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterate over live entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> + '_ {
        self.live.ones().filter_map(move |index| {
            self.slots[index]
                .as_ref()
                .map(|value| (Handle::from_raw(index as u32), value))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> + '_ {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_mut()
                    .map(|value| (Handle::from_raw(index as u32), value))
            })
    }

    /// Live handles in index order.
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.live
            .ones()
            .map(|index| Handle::from_raw(index as u32))
            .collect()
    }

    /// Remove every live entry, returning them in index order.
    pub fn drain(&mut self) -> Vec<T> {
        self.live.clear();
        self.live_count = 0;
        self.slots.drain(..).flatten().collect()
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Handle<T>> for HandleTable<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        match self.check(handle) {
            Ok(()) => match &self.slots[handle.raw() as usize] {
                Some(value) => value,
                None => panic!("slot {} is live but empty", handle.raw()),
            },
            Err(e) => panic!("invalid handle access: {e}"),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// A [`HandleTable`] behind a reader/writer lock.
///
/// Readers get a [`TableRead`] view that performs bounds-checked lookups
/// under the shared lock. Writers take the exclusive lock for structural
/// changes (push, erase, set).
pub struct LockedTable<T> {
    name: &'static str,
    inner: RwLock<HandleTable<T>>,
}

impl<T> LockedTable<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: RwLock::new(HandleTable::new()),
        }
    }

    /// Name used in diagnostics and leak reports.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn read(&self) -> TableRead<'_, T> {
        TableRead {
            guard: self.inner.read(),
        }
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, HandleTable<T>> {
        self.inner.write()
    }

    pub fn push(&self, value: T) -> Handle<T> {
        self.inner.write().push(value)
    }

    pub fn erase(&self, handle: Handle<T>) -> Option<T> {
        self.inner.write().erase(handle)
    }

    pub fn exists(&self, handle: Handle<T>) -> bool {
        self.inner.read().exists(handle)
    }

    pub fn live_count(&self) -> usize {
        self.inner.read().live_count()
    }

    pub fn handles(&self) -> Vec<Handle<T>> {
        self.inner.read().handles()
    }

    /// Run `f` on a live entry under the shared lock.
    pub fn with<R>(&self, handle: Handle<T>, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.inner.read().get(handle).map(f)
    }

    /// Run `f` on a live entry under the exclusive lock.
    pub fn with_mut<R>(&self, handle: Handle<T>, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.inner.write().get_mut(handle).map(f)
    }
}

impl<T: Clone> LockedTable<T> {
    /// Clone a live entry out of the table.
    pub fn get_cloned(&self, handle: Handle<T>) -> Option<T> {
        self.inner.read().get(handle).cloned()
    }
}

impl<T> fmt::Debug for LockedTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedTable")
            .field("name", &self.name)
            .field("live", &self.live_count())
            .finish()
    }
}

/// Shared read view over a [`LockedTable`].
pub struct TableRead<'a, T> {
    guard: RwLockReadGuard<'a, HandleTable<T>>,
}

impl<T> Deref for TableRead<'_, T> {
    type Target = HandleTable<T>;

    fn deref(&self) -> &HandleTable<T> {
        &self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_then_exists() {
        let mut table = HandleTable::new();
        let h = table.push(10);
        assert!(table.exists(h));
        assert_eq!(table.get(h), Some(&10));
        assert_eq!(table.live_count(), 1);
    }

    #[test]
    fn test_erase_keeps_other_indices() {
        let mut table = HandleTable::new();
        let a = table.push('a');
        let b = table.push('b');
        let c = table.push('c');

        assert_eq!(table.erase(b), Some('b'));
        assert!(!table.exists(b));
        assert_eq!(table[a], 'a');
        assert_eq!(table[c], 'c');
        assert_eq!(table.capacity(), 3);

        // Plain push never reuses a dead slot.
        let d = table.push('d');
        assert_eq!(d.raw(), 3);
    }

    #[test]
    fn test_push_reusing_fills_first_hole() {
        let mut table = HandleTable::new();
        let a = table.push(1);
        let _b = table.push(2);
        table.erase(a);

        let (h, reused) = table.push_reusing(3);
        assert!(reused);
        assert_eq!(h, a);
        assert_eq!(table[h], 3);

        let (h, reused) = table.push_reusing(4);
        assert!(!reused);
        assert_eq!(h.raw(), 2);
    }

    #[test]
    fn test_null_handle() {
        let table = HandleTable::<u8>::new();
        let null = Handle::<u8>::NULL;
        assert!(null.is_null());
        assert_eq!(null.get(), None);
        assert!(!table.exists(null));
        assert_eq!(table.check(null), Err(HandleError::Null));
        assert_eq!(Handle::<u8>::from_option(None), null);
        assert_eq!(Handle::<u8>::from_option(Some(4)).raw(), 4);
    }

    #[test]
    fn test_dead_and_out_of_range_lookups() {
        let mut table = HandleTable::new();
        let a = table.push(1u32);
        table.erase(a);

        assert_eq!(table.get(a), None);
        assert_eq!(table.check(a), Err(HandleError::Destroyed(0)));
        assert_eq!(
            table.check(Handle::from_raw(9)),
            Err(HandleError::OutOfRange { index: 9, len: 1 })
        );
        assert!(table.set(a, 5).is_err());
    }

    #[test]
    #[should_panic(expected = "invalid handle access")]
    fn test_index_dead_handle_panics() {
        let mut table = HandleTable::new();
        let a = table.push(1u32);
        table.erase(a);
        let _ = table[a];
    }

    #[test]
    fn test_iter_skips_dead() {
        let mut table = HandleTable::new();
        let a = table.push(1);
        let b = table.push(2);
        let c = table.push(3);
        table.erase(b);

        let live: Vec<_> = table.iter().map(|(h, v)| (h, *v)).collect();
        assert_eq!(live, vec![(a, 1), (c, 3)]);
        assert_eq!(table.handles(), vec![a, c]);
    }

    #[test]
    fn test_locked_table_views() {
        let table = LockedTable::new("numbers");
        let h = table.push(7);
        assert_eq!(table.with(h, |v| *v * 2), Some(14));
        table.with_mut(h, |v| *v = 8);
        assert_eq!(table.read()[h], 8);
        assert_eq!(table.get_cloned(h), Some(8));
        assert_eq!(table.erase(h), Some(8));
        assert_eq!(table.live_count(), 0);
        assert_eq!(table.name(), "numbers");
    }
}
