//! Raw key/value backend seam
//!
//! This trait abstracts the transactional KV substrate behind the record
//! store to enable swapping backends in unit tests. The concrete
//! `EtcdStore` implements it; tests use the in-memory implementation.

use async_trait::async_trait;

use crate::error::StoreError;

/// Default per-transaction operation cap, matching etcd's
/// `--max-txn-ops` server default.
pub const DEFAULT_MAX_TXN_OPS: usize = 128;

/// Opaque per-key version token.
///
/// A token read in one operation is only valid for the very next
/// conditional write against the same key; after a conflict the caller
/// must use the token returned with the conflicting record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub(crate) i64);

impl Version {
    /// Sentinel for "the key must not exist yet"; a conditional write
    /// against `NONE` creates the key.
    pub const NONE: Version = Version(0);

    /// Token assigned to a freshly created key.
    pub const BASE: Version = Version(1);

    /// Token that a successful conditional write against `self` produces.
    #[must_use]
    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A raw value together with the version token it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    /// Serialized record bytes
    pub value: Vec<u8>,
    /// Version token for the next conditional write
    pub version: Version,
}

/// Result of a single-shot conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The stored version matched and the value was written; carries the
    /// fresh token.
    Applied(Version),
    /// The stored version did not match; the store is untouched and the
    /// actually-stored value is returned so the caller can retry against
    /// its token.
    Conflict(VersionedValue),
}

/// Backend operations of the versioned record store.
///
/// Every operation is safe to call concurrently from any number of
/// processes against the same backend. Atomicity is per single
/// conditional write (`compare_and_put`) or per transaction (`txn_put`),
/// never across calls.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the current value and version; `StoreError::NotFound` when
    /// the key is absent.
    async fn get(&self, key: &str) -> Result<VersionedValue, StoreError>;

    /// Unconditional upsert. Returns the previous version plus one when a
    /// previous value existed, else [`Version::BASE`], so a fresh put can
    /// be followed immediately by a conditional write without re-reading.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<Version, StoreError>;

    /// Unconditional delete; `StoreError::NotFound` if the key was
    /// already absent (a no-op is distinguishable from success).
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically delete the key and return the last stored value.
    async fn get_and_delete(&self, key: &str) -> Result<VersionedValue, StoreError>;

    /// Single-shot conditional write. `expected == Version::NONE` creates
    /// the key if absent; any other expected token against an absent key
    /// is `StoreError::NotFound`.
    async fn compare_and_put(
        &self,
        key: &str,
        expected: Version,
        value: Vec<u8>,
    ) -> Result<CasOutcome, StoreError>;

    /// Write all entries in one transaction. Errors with `TxnTooLarge`
    /// when handed more operations than [`KvStore::max_txn_ops`].
    async fn txn_put(&self, entries: &[(String, Vec<u8>)]) -> Result<(), StoreError>;

    /// The substrate's per-transaction operation cap; `put_multi` chunks
    /// batches to this size.
    fn max_txn_ops(&self) -> usize;
}
