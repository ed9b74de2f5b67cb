//! Error types returned by the cache.
//!
//! Mirrors the error taxonomy a directory backend's entry cache needs: two
//! ordinary outcomes callers are expected to handle (`Duplicate`,
//! `NotFound`), and two fatal kinds that mean the cache's structural
//! invariants can no longer be trusted.

use thiserror::Error;

/// Errors produced by [`crate::Cache`] operations.
///
/// `Duplicate` and `NotFound` are routine — callers match on them as part of
/// normal control flow. `Resource` and `Corruption` are not: they signal
/// that an operation could not maintain the cache's invariants and should be
/// treated as fatal by the caller (see `DESIGN.md` for the recovery policy).
#[derive(Debug, Error)]
pub enum CacheError {
    /// The DN or ID index already contains an entry for this key.
    #[error("an entry with this DN or ID is already cached")]
    Duplicate,

    /// No resident entry matches the requested key.
    #[error("no cached entry matches the requested key")]
    NotFound,

    /// Metadata allocation or lock initialization failed while inserting.
    #[error("failed to allocate cache resources for this entry")]
    Resource,

    /// A structural invariant did not hold mid-operation. The cache should
    /// be considered unrecoverable once this is observed.
    #[error("cache invariant violated: {0}")]
    Corruption(&'static str),
}
