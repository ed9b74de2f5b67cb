//! The per-record state machine and lock-mode type.
//!
//! `Creating` and `Committed` records exist in both indices and the LRU
//! list but are not visible to lookups; only `Ready` is. A record moves to
//! `Deleted` either explicitly (`delete`, eviction) or implicitly (a
//! borrower returns a `Creating` record without committing).

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a cached record.
///
/// `Creating → (Committed | Deleted) → Ready → Deleted → freed`. There is no
/// `Undefined` or sentinel state exposed here: a record's state is always
/// one of these four variants from the moment it is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum RecordState {
    /// Inserted into the indices and LRU list; the producer has not yet
    /// declared it valid. Not visible to lookups.
    Creating = 0,
    /// The producer declared the entry valid but still holds the borrow.
    /// Not visible to lookups until the borrow is returned.
    Committed = 1,
    /// Available for lookup and for additional borrows.
    Ready = 2,
    /// Removed from both indices and the LRU list; persists only until the
    /// last outstanding borrow is returned.
    Deleted = 3,
}

impl RecordState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => RecordState::Creating,
            1 => RecordState::Committed,
            2 => RecordState::Ready,
            3 => RecordState::Deleted,
            _ => unreachable!("invalid encoded RecordState"),
        }
    }
}

/// An atomic cell holding a [`RecordState`].
///
/// `commit()` is the one transition allowed to happen without the cache
/// mutex held: the borrower flips `Creating` to `Committed` while other
/// threads may concurrently read the state under the cache mutex during a
/// `find_*` retry. A plain field would make that a data race under Rust's
/// memory model, so this uses an atomic with acquire/release ordering to
/// give a genuinely lock-free commit path.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: RecordState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> RecordState {
        RecordState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: RecordState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Transitions `Creating -> Committed`, failing if the record is not
    /// currently `Creating`.
    pub(crate) fn commit(&self) -> Result<(), RecordState> {
        self.0
            .compare_exchange(
                RecordState::Creating as u8,
                RecordState::Committed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(RecordState::from_u8)
    }
}

/// Which mode a per-entry reader-writer lock is held in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared access: any number of readers may hold this concurrently.
    Read,
    /// Exclusive access: no other reader or writer may hold this concurrently.
    Write,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_succeeds_from_creating() {
        let cell = StateCell::new(RecordState::Creating);
        assert!(cell.commit().is_ok());
        assert_eq!(cell.load(), RecordState::Committed);
    }

    #[test]
    fn commit_fails_from_other_states() {
        for state in [RecordState::Committed, RecordState::Ready, RecordState::Deleted] {
            let cell = StateCell::new(state);
            assert_eq!(cell.commit(), Err(state));
            assert_eq!(cell.load(), state);
        }
    }

    #[test]
    fn store_overwrites_state() {
        let cell = StateCell::new(RecordState::Creating);
        cell.store(RecordState::Ready);
        assert_eq!(cell.load(), RecordState::Ready);
    }
}
