//! The external entry payload interface.
//!
//! The cache does not define what an entry *is* — that is the backing
//! store's concern. It only needs three things from whatever payload a
//! caller hands it: a numeric identifier, a normalized DN used as the
//! lookup/ordering key, and a display DN it never inspects.

/// A cacheable directory entry.
///
/// Implementors own their payload; the cache only ever reads `id()` and
/// `ndn()` to maintain its two indices. Comparisons use the natural `Ord` of
/// `u64` and `&[u8]` (lexicographic over bytes) — no custom comparator type
/// is needed.
///
/// `id() == 0` is reserved to mean "no such id" and must never be used for
/// a resident entry; [`crate::Cache::add`] does not special-case it, so a
/// producer that hands in `id() == 0` will simply collide with any other
/// such entry at the ID index.
pub trait Entry: Send {
    /// The entry's numeric identifier.
    fn id(&self) -> u64;

    /// The normalized DN: the byte sequence used for lookup and ordering.
    fn ndn(&self) -> &[u8];

    /// The display-form DN. The cache never reads this for indexing or
    /// comparison; it exists only so implementors have a conventional place
    /// to put it. Defaults to [`Entry::ndn`].
    fn dn(&self) -> &[u8] {
        self.ndn()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Entry;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct TestEntry {
        pub id: u64,
        pub ndn: Vec<u8>,
        pub payload: &'static str,
    }

    impl TestEntry {
        pub(crate) fn new(id: u64, ndn: &str, payload: &'static str) -> Self {
            Self {
                id,
                ndn: ndn.as_bytes().to_vec(),
                payload,
            }
        }
    }

    impl Entry for TestEntry {
        fn id(&self) -> u64 {
            self.id
        }

        fn ndn(&self) -> &[u8] {
            &self.ndn
        }
    }
}
