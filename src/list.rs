//! The LRU list: an intrusive, doubly linked list threaded through
//! [`Record`] nodes, built from the same raw-pointer splice techniques as
//! any intrusive list, specialized two ways:
//!
//! - No sigil/wrapper node layer. A [`Record`] already carries its own
//!   `lru_prev`/`lru_next` fields, so this list operates directly on
//!   `NonNull<Record<E>>` rather than allocating a separate list node per
//!   entry.
//! - Detaching a node does not imply freeing it. The cache core can unlink
//!   a record from this list while a borrower still holds a reference to
//!   it (outstanding refcount > 0); the list's job is only to track LRU
//!   order among currently-indexed records, never ownership of the node's
//!   memory. Allocating and freeing `Record<E>` boxes is the cache core's
//!   responsibility.
//!
//! All operations here assume the caller already holds the cache mutex —
//! this list has no internal synchronization of its own.

use std::ptr::NonNull;

use crate::entry::Entry;
use crate::record::Record;

/// Head = most recently used, tail = least recently used.
pub(crate) struct LruList<E: Entry> {
    head: Option<NonNull<Record<E>>>,
    tail: Option<NonNull<Record<E>>>,
    len: usize,
}

impl<E: Entry> LruList<E> {
    pub(crate) fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Splices `node` in at the head.
    ///
    /// # Safety
    ///
    /// `node` must point to a live, currently unlinked `Record<E>`.
    pub(crate) unsafe fn push_front(&mut self, mut node: NonNull<Record<E>>) {
        // SAFETY: caller guarantees `node` is live and unlinked.
        unsafe {
            node.as_mut().lru_prev = None;
            node.as_mut().lru_next = self.head;
        }
        match self.head {
            // SAFETY: `self.head`, when `Some`, always points to a live node
            // owned by this list.
            Some(mut old_head) => unsafe { old_head.as_mut().lru_prev = Some(node) },
            None => self.tail = Some(node),
        }
        self.head = Some(node);
        self.len += 1;
    }

    /// Unlinks `node` from the list, fixing up its neighbors.
    ///
    /// # Safety
    ///
    /// `node` must point to a live `Record<E>` that is currently linked
    /// into this list.
    pub(crate) unsafe fn unlink(&mut self, node: NonNull<Record<E>>) {
        // SAFETY: caller guarantees `node` is linked into this list, so its
        // prev/next (if any) are live nodes also owned by this list.
        let (prev, next) = unsafe { (node.as_ref().lru_prev, node.as_ref().lru_next) };
        match prev {
            Some(mut p) => unsafe { p.as_mut().lru_next = next },
            None => self.head = next,
        }
        match next {
            Some(mut n) => unsafe { n.as_mut().lru_prev = prev },
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    /// `unlink` followed by `push_front` — the "touch" every successful
    /// lookup performs.
    ///
    /// # Safety
    ///
    /// `node` must point to a live `Record<E>` currently linked into this
    /// list.
    pub(crate) unsafe fn move_to_front(&mut self, node: NonNull<Record<E>>) {
        if self.head == Some(node) {
            return;
        }
        // SAFETY: forwarded from this function's own contract.
        unsafe {
            self.unlink(node);
            self.push_front(node);
        }
    }

    /// The current LRU tail (least recently used), if any.
    pub(crate) fn tail(&self) -> Option<NonNull<Record<E>>> {
        self.tail
    }

    /// The current LRU head (most recently used), if any.
    pub(crate) fn head(&self) -> Option<NonNull<Record<E>>> {
        self.head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::test_support::TestEntry;
    use crate::state::RecordState;

    fn leak(entry: TestEntry) -> NonNull<Record<TestEntry>> {
        NonNull::new(Box::into_raw(Record::new(entry, RecordState::Ready))).unwrap()
    }

    unsafe fn free(ptr: NonNull<Record<TestEntry>>) {
        // SAFETY: test-only cleanup of a pointer obtained from `leak`.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }

    #[test]
    fn push_front_orders_most_recent_first() {
        let mut list = LruList::new();
        let a = leak(TestEntry::new(1, "a", "a"));
        let b = leak(TestEntry::new(2, "b", "b"));
        let c = leak(TestEntry::new(3, "c", "c"));

        unsafe {
            list.push_front(a);
            list.push_front(b);
            list.push_front(c);
        }

        assert_eq!(list.len(), 3);
        assert_eq!(list.head(), Some(c));
        assert_eq!(list.tail(), Some(a));

        unsafe {
            free(a);
            free(b);
            free(c);
        }
    }

    #[test]
    fn move_to_front_reorders_without_changing_length() {
        let mut list = LruList::new();
        let a = leak(TestEntry::new(1, "a", "a"));
        let b = leak(TestEntry::new(2, "b", "b"));
        let c = leak(TestEntry::new(3, "c", "c"));
        unsafe {
            list.push_front(a);
            list.push_front(b);
            list.push_front(c);
            // order before: c, b, a (a is tail)
            list.move_to_front(a);
        }
        assert_eq!(list.len(), 3);
        assert_eq!(list.head(), Some(a));
        assert_eq!(list.tail(), Some(b));

        unsafe {
            free(a);
            free(b);
            free(c);
        }
    }

    #[test]
    fn unlink_middle_node_fixes_neighbors() {
        let mut list = LruList::new();
        let a = leak(TestEntry::new(1, "a", "a"));
        let b = leak(TestEntry::new(2, "b", "b"));
        let c = leak(TestEntry::new(3, "c", "c"));
        unsafe {
            list.push_front(a);
            list.push_front(b);
            list.push_front(c);
            // order: c, b, a
            list.unlink(b);
        }
        assert_eq!(list.len(), 2);
        assert_eq!(list.head(), Some(c));
        assert_eq!(list.tail(), Some(a));

        unsafe {
            free(a);
            free(b);
            free(c);
        }
    }

    #[test]
    fn unlink_head_and_tail_updates_sentinels() {
        let mut list = LruList::new();
        let a = leak(TestEntry::new(1, "a", "a"));
        unsafe {
            list.push_front(a);
            list.unlink(a);
        }
        assert_eq!(list.len(), 0);
        assert_eq!(list.head(), None);
        assert_eq!(list.tail(), None);

        unsafe {
            free(a);
        }
    }
}
