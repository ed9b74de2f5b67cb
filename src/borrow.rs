//! The borrowed-entry guard returned by [`crate::Cache::add`] and
//! [`crate::Cache::find_by_id`].
//!
//! A `Borrowed` couples the per-entry lock guard with the bookkeeping the
//! cache core needs to run when the borrow ends: decrementing the record's
//! refcount, finishing a pending state transition (`Creating` to `Ready` or
//! to an implicit abandon, `Committed` to `Ready`), and freeing the record
//! if it was deleted while borrowed and this was the last reference.

use std::fmt;
use std::ptr::NonNull;

use crate::record::{PayloadGuard, Record};
use crate::state::LockMode;
use crate::Cache;
use crate::Entry;

/// A live handle on a cached entry's payload.
///
/// Dropping a `Borrowed` releases the per-entry lock and returns the
/// record to the cache, running whatever bookkeeping its current state
/// requires. While a `Borrowed` is held, the underlying record cannot be
/// freed even if it is concurrently deleted from the cache.
pub struct Borrowed<'c, E: Entry> {
    pub(crate) cache: &'c Cache<E>,
    pub(crate) ptr: NonNull<Record<E>>,
    pub(crate) mode: LockMode,
    pub(crate) guard: Option<PayloadGuard<'c, E>>,
}

impl<'c, E: Entry> Borrowed<'c, E> {
    /// The lock mode this borrow was acquired in.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Read access to the borrowed payload.
    pub fn get(&self) -> &E {
        self.guard.as_ref().expect("guard present until drop").get()
    }

    /// Mutable access to the borrowed payload, if this borrow was acquired
    /// in [`LockMode::Write`]. Returns `None` for a read borrow.
    pub fn get_mut(&mut self) -> Option<&mut E> {
        self.guard.as_mut().expect("guard present until drop").get_mut()
    }

    /// Declares a just-created entry valid, making it visible to other
    /// lookups once this borrow is dropped.
    ///
    /// Only meaningful for a borrow returned by [`crate::Cache::add`]; a
    /// borrow obtained from [`crate::Cache::find_by_id`] is already
    /// `Ready` and this is a no-op for it (the underlying transition
    /// simply fails and is ignored).
    pub fn commit(&self) {
        // SAFETY: `self.ptr` is kept alive by this borrow's own reference
        // count, which has not yet been released.
        let record = unsafe { self.ptr.as_ref() };
        let _ = record.state.commit();
    }
}

impl<E: Entry> fmt::Debug for Borrowed<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Borrowed").field("mode", &self.mode).finish_non_exhaustive()
    }
}

impl<E: Entry> Drop for Borrowed<'_, E> {
    fn drop(&mut self) {
        // Release the per-entry lock before taking the cache mutex, to
        // respect the lock hierarchy (cache mutex outranks per-entry
        // locks; never acquire a per-entry lock while already holding
        // another one).
        self.guard.take();
        self.cache.return_entry(self.ptr);
    }
}
