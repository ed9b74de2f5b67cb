//! The cached unit: one resident entry plus the bookkeeping the cache core
//! needs to manage it.
//!
//! The LRU links live inside the record itself, so a record is both an
//! index value and an LRU-list node — no separate list-node allocation or
//! lookup is needed to move a record within the list. The DN/ID indices
//! hold non-owning raw pointers to these records; the LRU list is what
//! actually owns the allocation.

use std::ptr::NonNull;

use parking_lot::RwLock;

use crate::entry::Entry;
use crate::state::{LockMode, RecordState, StateCell};

/// A cached entry plus the metadata the cache needs to manage it.
///
/// `ndn`/`id` are copied out of the payload at `add`/`update` time so the
/// cache core can maintain the indices and run the eviction scan without
/// taking the per-entry lock. The cache mutex protects the indices, the
/// LRU list, the running size count, and every record's `state`, `refcnt`,
/// and LRU links — not the payload itself, which has its own lock.
pub(crate) struct Record<E: Entry> {
    pub(crate) state: StateCell,
    pub(crate) refcnt: usize,
    pub(crate) id: u64,
    pub(crate) ndn: Box<[u8]>,
    pub(crate) payload: RwLock<E>,
    pub(crate) lru_prev: Option<NonNull<Record<E>>>,
    pub(crate) lru_next: Option<NonNull<Record<E>>>,
}

impl<E: Entry> Record<E> {
    pub(crate) fn new(entry: E, initial_state: RecordState) -> Box<Self> {
        let id = entry.id();
        let ndn: Box<[u8]> = entry.ndn().into();
        Box::new(Self {
            state: StateCell::new(initial_state),
            refcnt: 0,
            id,
            ndn,
            payload: RwLock::new(entry),
            lru_prev: None,
            lru_next: None,
        })
    }

    /// Attempts to acquire the per-entry lock in `mode` without blocking.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live `Record<E>` — i.e. the caller must hold a
    /// reference that keeps it from being freed (an index entry looked up
    /// under the cache mutex, or an existing borrow).
    pub(crate) unsafe fn try_lock<'a>(
        ptr: NonNull<Record<E>>,
        mode: LockMode,
    ) -> Option<PayloadGuard<'a, E>> {
        // SAFETY: caller guarantees `ptr` is live for at least `'a`.
        let record: &'a Record<E> = unsafe { ptr.as_ref() };
        match mode {
            LockMode::Read => record.payload.try_read().map(PayloadGuard::Read),
            LockMode::Write => record.payload.try_write().map(PayloadGuard::Write),
        }
    }

    /// Acquires the per-entry lock in `mode`, blocking until available.
    ///
    /// Used only right after a record is first created, where the cache
    /// mutex is held but no other thread can possibly have a handle to this
    /// record yet, so the lock can never actually be contended.
    ///
    /// # Safety
    ///
    /// Same contract as [`Record::try_lock`].
    pub(crate) unsafe fn lock<'a>(ptr: NonNull<Record<E>>, mode: LockMode) -> PayloadGuard<'a, E> {
        // SAFETY: caller guarantees `ptr` is live for at least `'a`.
        let record: &'a Record<E> = unsafe { ptr.as_ref() };
        match mode {
            LockMode::Read => PayloadGuard::Read(record.payload.read()),
            LockMode::Write => PayloadGuard::Write(record.payload.write()),
        }
    }
}

/// The per-entry reader-writer lock guard, held by a [`crate::Borrowed`].
pub(crate) enum PayloadGuard<'a, E: Entry> {
    Read(parking_lot::RwLockReadGuard<'a, E>),
    Write(parking_lot::RwLockWriteGuard<'a, E>),
}

impl<'a, E: Entry> PayloadGuard<'a, E> {
    pub(crate) fn get(&self) -> &E {
        match self {
            PayloadGuard::Read(g) => g,
            PayloadGuard::Write(g) => g,
        }
    }

    pub(crate) fn get_mut(&mut self) -> Option<&mut E> {
        match self {
            PayloadGuard::Read(_) => None,
            PayloadGuard::Write(g) => Some(g),
        }
    }
}
