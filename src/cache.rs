//! The cache itself: dual DN/ID indices over an intrusive LRU list, guarded
//! by a single structural mutex, with per-entry locks for payload access.
//!
//! Two lock tiers are in play. The cache mutex (`Inner<E>`) protects the
//! indices, the LRU list, the running size count, and every record's
//! state/refcount/LRU links. Each record's own `RwLock<E>` protects only
//! its payload. The cache mutex is always acquired first; a per-entry lock
//! is only ever taken via a non-blocking try-lock while the cache mutex is
//! held, never blockingly — a thread that can't get the per-entry lock
//! drops the cache mutex and retries instead of waiting while holding it.

use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::borrow::Borrowed;
use crate::config::CacheConfig;
use crate::entry::Entry;
use crate::error::CacheError;
use crate::list::LruList;
use crate::metrics::{CacheStats, MetricsInner};
use crate::record::Record;
use crate::state::{LockMode, RecordState};

/// Number of tail records the eviction scan will move back to the head
/// ("parole") before giving up and accepting that the cache may exceed
/// `maxsize` for now.
const MAX_PAROLE_ITERATIONS: usize = 10;

struct Inner<E: Entry> {
    dn_index: BTreeMap<Box<[u8]>, NonNull<Record<E>>>,
    id_index: BTreeMap<u64, NonNull<Record<E>>>,
    list: LruList<E>,
    cursize: usize,
    metrics: MetricsInner,
}

/// A concurrent, LRU-bounded cache of directory entries, looked up by
/// normalized DN or by numeric ID.
pub struct Cache<E: Entry> {
    maxsize: usize,
    inner: Mutex<Inner<E>>,
}

// SAFETY: `Inner<E>`'s raw pointers only ever reference `Record<E>` boxes
// that the cache itself allocated and owns via its LRU list; they are
// never exposed outside a `Cache<E>` method body. `E: Send` means the
// payload behind each pointer may be moved to or accessed from another
// thread, which is what actually matters for `Send` here.
unsafe impl<E: Entry + Send> Send for Cache<E> {}
// SAFETY: all structural access to `Inner<E>` goes through the cache
// mutex; per-entry payload access goes through each record's own
// `RwLock`. A `find_by_id(.., Read)` borrow hands out `&E` via
// `Borrowed::get`, and `try_read` permits multiple concurrent readers, so
// two threads can end up holding `&E` to the same payload at once. That
// requires `E: Sync`, not just `E: Send` — a `Send`-only bound here would
// let a `Send + !Sync` entry (e.g. one built on a `Cell`) be shared across
// threads unsoundly through this impl alone.
unsafe impl<E: Entry + Send + Sync> Sync for Cache<E> {}

impl<E: Entry> Cache<E> {
    /// Creates an empty cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        debug!(maxsize = config.maxsize, "creating cache");
        Self {
            maxsize: config.maxsize,
            inner: Mutex::new(Inner {
                dn_index: BTreeMap::new(),
                id_index: BTreeMap::new(),
                list: LruList::new(),
                cursize: 0,
                metrics: MetricsInner::default(),
            }),
        }
    }

    /// The configured soft capacity.
    pub fn max_size(&self) -> usize {
        self.maxsize
    }

    /// The number of resident entries (in any state).
    pub fn len(&self) -> usize {
        self.inner.lock().cursize
    }

    /// Whether the cache currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a `Ready` or not-yet-visible entry is indexed under this DN.
    ///
    /// This is a point-in-time peek: unlike `find_by_dn`, it does not wait
    /// for a `Creating`/`Committed` record to settle and does not touch
    /// LRU order.
    pub fn contains_dn(&self, ndn: &[u8]) -> bool {
        self.inner.lock().dn_index.contains_key(ndn)
    }

    /// Whether any entry is indexed under this ID.
    pub fn contains_id(&self, id: u64) -> bool {
        self.inner.lock().id_index.contains_key(&id)
    }

    /// A snapshot of the cache's activity counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().metrics.snapshot()
    }

    /// Inserts a new entry, returning a borrow on it in `Creating` state.
    ///
    /// The caller must either [`Borrowed::commit`] the returned borrow
    /// before dropping it (making the entry visible as `Ready`), or simply
    /// drop it uncommitted, which abandons and removes the entry.
    ///
    /// Fails with [`CacheError::Duplicate`] if an entry with the same DN or
    /// ID is already indexed.
    pub fn add(&self, entry: E, mode: LockMode) -> Result<Borrowed<'_, E>, CacheError> {
        let mut inner = self.inner.lock();

        let ndn = entry.ndn().to_vec();
        let id = entry.id();
        if inner.dn_index.contains_key(ndn.as_slice()) || inner.id_index.contains_key(&id) {
            inner.metrics.duplicate_rejections += 1;
            trace!(id, "add rejected: duplicate");
            return Err(CacheError::Duplicate);
        }

        let raw = Box::into_raw(Record::new(entry, RecordState::Creating));
        let ptr = NonNull::new(raw).expect("Box::into_raw is never null");

        let dn_key: Box<[u8]> = ndn.into_boxed_slice();
        if inner.dn_index.insert(dn_key.clone(), ptr).is_some() {
            // SAFETY: `ptr` was just allocated above and has not been
            // published anywhere else yet.
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
            return Err(CacheError::Corruption("dn index already occupied after duplicate check"));
        }
        if inner.id_index.insert(id, ptr).is_some() {
            // Roll back the DN index insertion.
            if inner.dn_index.remove(dn_key.as_ref()).is_none() {
                return Err(CacheError::Corruption("failed to roll back dn index after id collision"));
            }
            // SAFETY: `ptr` was just allocated above and has now been
            // removed from both indices, so nothing else references it.
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
            return Err(CacheError::Corruption("id index already occupied after duplicate check"));
        }

        // SAFETY: `ptr` was just allocated and is not linked into any list.
        unsafe { inner.list.push_front(ptr) };
        inner.cursize += 1;
        inner.metrics.insertions += 1;

        // SAFETY: the record was just created; no other thread can have a
        // handle to it yet, so this cannot actually block.
        let guard = unsafe { Record::lock(ptr, mode) };
        // SAFETY: `ptr` is freshly inserted and exclusively reachable
        // through `inner`, which we still hold.
        unsafe {
            (*ptr.as_ptr()).refcnt += 1;
        }

        self.evict_if_needed(&mut inner);

        trace!(id, "add: inserted");
        Ok(Borrowed { cache: self, ptr, mode, guard: Some(guard) })
    }

    /// Looks up a `Ready` entry by DN and returns its ID.
    ///
    /// This is a hint, not a guarantee: by the time the caller uses the ID
    /// with [`Cache::find_by_id`], the entry may have been deleted. Callers
    /// that need the entry itself should follow up with `find_by_id` and
    /// treat [`CacheError::NotFound`] from that call as a normal outcome,
    /// not a bug.
    pub fn find_by_dn(&self, ndn: &[u8]) -> Result<u64, CacheError> {
        loop {
            let mut inner = self.inner.lock();
            let Some(&ptr) = inner.dn_index.get(ndn) else {
                inner.metrics.misses += 1;
                return Err(CacheError::NotFound);
            };
            // SAFETY: `ptr` came from the index we're still holding the
            // cache mutex for, so it is live.
            let state = unsafe { ptr.as_ref().state.load() };
            match state {
                RecordState::Ready => {
                    // SAFETY: `ptr` is linked into this list (it is
                    // reachable from the index) and live.
                    unsafe { inner.list.move_to_front(ptr) };
                    inner.metrics.hits += 1;
                    // SAFETY: `ptr` is live for the duration of this read.
                    let id = unsafe { ptr.as_ref().id };
                    return Ok(id);
                }
                RecordState::Creating | RecordState::Committed => {
                    drop(inner);
                    thread::yield_now();
                    continue;
                }
                RecordState::Deleted => {
                    inner.metrics.misses += 1;
                    return Err(CacheError::NotFound);
                }
            }
        }
    }

    /// Looks up a `Ready` entry by ID and returns a borrow on it, acquiring
    /// the per-entry lock in `mode`.
    pub fn find_by_id(&self, id: u64, mode: LockMode) -> Result<Borrowed<'_, E>, CacheError> {
        loop {
            let mut inner = self.inner.lock();
            let Some(&ptr) = inner.id_index.get(&id) else {
                inner.metrics.misses += 1;
                return Err(CacheError::NotFound);
            };
            // SAFETY: `ptr` came from the index we're still holding the
            // cache mutex for, so it is live.
            let state = unsafe { ptr.as_ref().state.load() };
            if state != RecordState::Ready {
                drop(inner);
                thread::yield_now();
                continue;
            }
            // SAFETY: `ptr` is live; this is the only place a per-entry
            // lock is acquired while the cache mutex is held, and it is
            // strictly non-blocking.
            let Some(guard) = (unsafe { Record::try_lock(ptr, mode) }) else {
                drop(inner);
                thread::yield_now();
                continue;
            };
            // SAFETY: `ptr` is live and we hold the cache mutex, which is
            // the only thing that ever mutates `refcnt`.
            unsafe {
                (*ptr.as_ptr()).refcnt += 1;
            }
            // SAFETY: `ptr` is linked into this list and live.
            unsafe { inner.list.move_to_front(ptr) };
            inner.metrics.hits += 1;
            return Ok(Borrowed { cache: self, ptr, mode, guard: Some(guard) });
        }
    }

    /// Revives a record whose `state` is `Deleted` back into both indices
    /// and the LRU list, reading its current `id`/`ndn` from the borrow's
    /// payload.
    ///
    /// The caller must still hold the `Borrowed` from before the record was
    /// deleted — its per-entry lock and refcount carry forward unchanged,
    /// the same borrow must still be committed or dropped afterward exactly
    /// as with [`Cache::add`]. This reads `id`/`ndn` straight from the
    /// borrow rather than re-acquiring the per-entry lock, so it never
    /// blocks on it. Fails with [`CacheError::Duplicate`] if the current
    /// `id`/`ndn` now collides with a different resident record. Runs the
    /// eviction scan on success, exactly as `add` does.
    pub fn update(&self, borrowed: &Borrowed<'_, E>) -> Result<(), CacheError> {
        let ptr = borrowed.ptr;
        let new_id = borrowed.get().id();
        let new_ndn: Box<[u8]> = borrowed.get().ndn().into();

        let mut inner = self.inner.lock();
        // SAFETY: `ptr` is kept alive by `borrowed`'s own reference count.
        let state = unsafe { ptr.as_ref().state.load() };
        if state != RecordState::Deleted {
            return Err(CacheError::Corruption("update called on a record that is not Deleted"));
        }

        if inner.dn_index.contains_key(new_ndn.as_ref()) || inner.id_index.contains_key(&new_id) {
            inner.metrics.duplicate_rejections += 1;
            trace!(new_id, "update rejected: duplicate");
            return Err(CacheError::Duplicate);
        }

        if inner.dn_index.insert(new_ndn.clone(), ptr).is_some() {
            return Err(CacheError::Corruption("dn index already occupied after duplicate check"));
        }
        if inner.id_index.insert(new_id, ptr).is_some() {
            if inner.dn_index.remove(new_ndn.as_ref()).is_none() {
                return Err(CacheError::Corruption("failed to roll back dn index after id collision"));
            }
            return Err(CacheError::Corruption("id index already occupied after duplicate check"));
        }

        // SAFETY: `ptr` is live and exclusively updated here under the
        // cache mutex.
        unsafe {
            (*ptr.as_ptr()).id = new_id;
            (*ptr.as_ptr()).ndn = new_ndn;
        }

        // SAFETY: `ptr` was unlinked from the list by the prior delete (or
        // abandon) and is not currently linked anywhere.
        unsafe { inner.list.push_front(ptr) };
        inner.cursize += 1;
        inner.metrics.insertions += 1;

        // SAFETY: `ptr` is live.
        unsafe { ptr.as_ref().state.store(RecordState::Creating) };

        self.evict_if_needed(&mut inner);

        debug!(new_id, "update: revived deleted record");
        Ok(())
    }

    /// Removes an entry from both indices and the LRU list.
    ///
    /// The record's memory is only freed once every outstanding
    /// [`Borrowed`] on it (including `borrowed` itself) has been dropped.
    pub fn delete(&self, borrowed: &Borrowed<'_, E>) -> Result<(), CacheError> {
        let ptr = borrowed.ptr;
        let mut inner = self.inner.lock();
        // SAFETY: `ptr` is kept alive by `borrowed`'s own reference count.
        let state = unsafe { ptr.as_ref().state.load() };
        if state == RecordState::Deleted {
            return Err(CacheError::NotFound);
        }
        // SAFETY: `ptr` is live.
        unsafe { ptr.as_ref().state.store(RecordState::Deleted) };
        // SAFETY: `ptr` is live.
        let (id, ndn) = unsafe { (ptr.as_ref().id, ptr.as_ref().ndn.clone()) };
        inner.dn_index.remove(ndn.as_ref());
        inner.id_index.remove(&id);
        // SAFETY: `ptr` is currently linked into this list.
        unsafe { inner.list.unlink(ptr) };
        inner.cursize -= 1;
        inner.metrics.removals += 1;
        trace!(id, "delete: unindexed");
        Ok(())
    }

    /// Unconditionally drops every entry with no outstanding borrows.
    ///
    /// Entries that still have a live [`Borrowed`] elsewhere are left in
    /// place with a warning logged; callers are expected to call this only
    /// once they know no borrows are outstanding (e.g. at shutdown).
    pub fn release_all(&self) {
        let mut inner = self.inner.lock();
        let mut cursor = inner.list.head();
        let mut freed = 0usize;
        while let Some(ptr) = cursor {
            // SAFETY: `ptr` is linked into this list and live.
            let next = unsafe { ptr.as_ref().lru_next };
            // SAFETY: `ptr` is live.
            let refcnt = unsafe { ptr.as_ref().refcnt };
            if refcnt == 0 {
                // SAFETY: `ptr` is live.
                let (id, ndn) = unsafe { (ptr.as_ref().id, ptr.as_ref().ndn.clone()) };
                inner.dn_index.remove(ndn.as_ref());
                inner.id_index.remove(&id);
                // SAFETY: `ptr` is currently linked into this list.
                unsafe { inner.list.unlink(ptr) };
                // SAFETY: the record has just been unlinked from every
                // structure that referenced it and has no outstanding
                // borrows.
                drop(unsafe { Box::from_raw(ptr.as_ptr()) });
                inner.metrics.removals += 1;
                freed += 1;
            } else {
                warn!(refcnt, "release_all: leaving borrowed entry in place");
            }
            cursor = next;
        }
        inner.cursize = inner.cursize.saturating_sub(freed);
        debug!(freed, "release_all complete");
    }

    /// Returns a borrowed record to the cache, running the bookkeeping its
    /// current state requires. Called only from [`Borrowed::drop`].
    pub(crate) fn return_entry(&self, ptr: NonNull<Record<E>>) {
        let mut inner = self.inner.lock();
        // SAFETY: `ptr` is live: the caller (a `Borrowed` being dropped)
        // is the last reference keeping its refcount above zero.
        unsafe {
            (*ptr.as_ptr()).refcnt -= 1;
        }
        // SAFETY: `ptr` is live.
        let (state, refcnt) = unsafe { (ptr.as_ref().state.load(), ptr.as_ref().refcnt) };
        match state {
            RecordState::Creating => {
                // The borrower never committed: abandon the entry.
                // SAFETY: `ptr` is live.
                unsafe { ptr.as_ref().state.store(RecordState::Deleted) };
                // SAFETY: `ptr` is live.
                let (id, ndn) = unsafe { (ptr.as_ref().id, ptr.as_ref().ndn.clone()) };
                inner.dn_index.remove(ndn.as_ref());
                inner.id_index.remove(&id);
                // SAFETY: `ptr` is currently linked into this list.
                unsafe { inner.list.unlink(ptr) };
                inner.cursize -= 1;
                inner.metrics.removals += 1;
                trace!(id, "abandoned uncommitted entry");
                if refcnt == 0 {
                    // SAFETY: just unlinked from every structure and has
                    // no outstanding borrows.
                    drop(unsafe { Box::from_raw(ptr.as_ptr()) });
                }
            }
            RecordState::Committed => {
                // SAFETY: `ptr` is live.
                unsafe { ptr.as_ref().state.store(RecordState::Ready) };
            }
            RecordState::Ready => {}
            RecordState::Deleted => {
                if refcnt == 0 {
                    // SAFETY: a `Deleted` record was already unlinked from
                    // the indices and the list by `delete`/eviction; this
                    // is the last reference to it.
                    drop(unsafe { Box::from_raw(ptr.as_ptr()) });
                }
            }
        }
    }

    /// Runs the parole-then-evict scan once the resident count exceeds
    /// `maxsize`. Caller must already hold `inner`.
    fn evict_if_needed(&self, inner: &mut Inner<E>) {
        if inner.cursize <= self.maxsize {
            return;
        }

        let mut parole_iterations = 0;
        while inner.cursize > self.maxsize && parole_iterations < MAX_PAROLE_ITERATIONS {
            let Some(tail) = inner.list.tail() else { break };
            // SAFETY: `tail` is the list's own tail pointer, live.
            let refcnt = unsafe { tail.as_ref().refcnt };
            if refcnt == 0 {
                break;
            }
            // SAFETY: `tail` is linked into this list and live.
            unsafe { inner.list.move_to_front(tail) };
            inner.metrics.parole_moves += 1;
            parole_iterations += 1;
        }

        while inner.cursize > self.maxsize {
            let Some(tail) = inner.list.tail() else { break };
            // SAFETY: `tail` is the list's own tail pointer, live.
            let refcnt = unsafe { tail.as_ref().refcnt };
            if refcnt != 0 {
                // Every remaining record is pinned; accept the transient
                // overflow rather than evicting something in use.
                break;
            }
            // SAFETY: `tail` is live.
            let (id, ndn) = unsafe { (tail.as_ref().id, tail.as_ref().ndn.clone()) };
            inner.dn_index.remove(ndn.as_ref());
            inner.id_index.remove(&id);
            // SAFETY: `tail` is currently linked into this list.
            unsafe { inner.list.unlink(tail) };
            // SAFETY: `tail` is live.
            unsafe { tail.as_ref().state.store(RecordState::Deleted) };
            inner.cursize -= 1;
            inner.metrics.evictions += 1;
            inner.metrics.removals += 1;
            // SAFETY: just unlinked from every structure; refcnt == 0
            // means no outstanding borrows reference it.
            drop(unsafe { Box::from_raw(tail.as_ptr()) });
            trace!(id, "evicted");
        }
    }
}

impl<E: Entry> Drop for Cache<E> {
    fn drop(&mut self) {
        // No `Borrowed<'_, E>` can outlive `self` (it borrows `&'c Cache<E>`),
        // so every resident record is guaranteed unreferenced here.
        let inner = self.inner.get_mut();
        let mut cursor = inner.list.head();
        while let Some(ptr) = cursor {
            // SAFETY: `ptr` is linked into this list and live.
            cursor = unsafe { ptr.as_ref().lru_next };
            // SAFETY: the list is the sole owner of every node it links,
            // and no `Borrowed` can outlive `self`, so this is the only
            // remaining reference.
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
        }
    }
}

impl<E: Entry> std::fmt::Debug for Cache<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("maxsize", &self.maxsize).field("len", &self.len()).finish()
    }
}
