//! Typed record store
//!
//! Wraps a [`KvStore`] backend with the record codec, decoded conflict
//! results, the retrying `update` operation, and chunked batch writes.

use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use crate::error::StoreError;
use crate::kv::{CasOutcome, KvStore, Version};
use crate::record::{StoreRecord, Versioned};

/// How long a conditional-write loop keeps retrying on conflicts.
///
/// Most callers retry forever; callers that prefer bounded latency under
/// heavy contention use a fixed attempt count and surface exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Retry until the write applies.
    #[default]
    Forever,
    /// Give up after this many attempts.
    Attempts(u32),
}

impl RetryPolicy {
    fn allows_retry_after(self, attempts: u32) -> bool {
        match self {
            RetryPolicy::Forever => true,
            RetryPolicy::Attempts(limit) => attempts < limit,
        }
    }
}

/// Result of a single-shot typed conditional write.
#[derive(Debug)]
pub enum UpdateOutcome<R> {
    /// The write applied; carries the fresh version token.
    Applied(Version),
    /// The write lost; carries the actually-stored record and its token
    /// so the caller can decide whether to retry.
    Conflict(Versioned<R>),
}

/// Typed, versioned record store shared by all allocator operations.
///
/// Cloning is cheap; clones share the backend.
#[derive(Clone)]
pub struct Store {
    kv: Arc<dyn KvStore>,
}

impl Store {
    /// Wrap a backend.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Fetch and decode the record at `key`; `StoreError::NotFound` when
    /// absent.
    pub async fn get<R: StoreRecord>(&self, key: &str) -> Result<Versioned<R>, StoreError> {
        let raw = self.kv.get(key).await?;
        Ok(Versioned {
            record: serde_json::from_slice(&raw.value)?,
            version: raw.version,
        })
    }

    /// Unconditionally upsert `record` under its own key. The returned
    /// token is valid for an immediately following conditional write.
    pub async fn put<R: StoreRecord>(&self, record: &R) -> Result<Version, StoreError> {
        let key = record.key();
        let value = serde_json::to_vec(record)?;
        self.kv.put(&key, value).await
    }

    /// Unconditionally delete `key`; `StoreError::NotFound` if it was
    /// already absent.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.kv.delete(key).await
    }

    /// Atomically delete `key` and return the last stored record.
    pub async fn get_and_delete<R: StoreRecord>(
        &self,
        key: &str,
    ) -> Result<Versioned<R>, StoreError> {
        let raw = self.kv.get_and_delete(key).await?;
        Ok(Versioned {
            record: serde_json::from_slice(&raw.value)?,
            version: raw.version,
        })
    }

    /// Single-shot conditional write: apply `record` if the stored
    /// version still equals `expected`, else return the stored record.
    pub async fn update_else_get<R: StoreRecord>(
        &self,
        key: &str,
        expected: Version,
        record: &R,
    ) -> Result<UpdateOutcome<R>, StoreError> {
        let value = serde_json::to_vec(record)?;
        match self.kv.compare_and_put(key, expected, value).await? {
            CasOutcome::Applied(version) => Ok(UpdateOutcome::Applied(version)),
            CasOutcome::Conflict(current) => Ok(UpdateOutcome::Conflict(Versioned {
                record: serde_json::from_slice(&current.value)?,
                version: current.version,
            })),
        }
    }

    /// Read-modify-write loop: fetch the record, apply `mutate`, and
    /// conditionally write it back. On a conflict the mutation is
    /// re-applied to the freshly read record and the write retried until
    /// it lands or `policy` stops it with `RetriesExhausted`.
    pub async fn update<R, F>(
        &self,
        key: &str,
        policy: RetryPolicy,
        mut mutate: F,
    ) -> Result<Versioned<R>, StoreError>
    where
        R: StoreRecord,
        F: FnMut(&mut R) + Send,
    {
        let mut current = self.get::<R>(key).await?;
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let mut candidate = current.record.clone();
            mutate(&mut candidate);
            match self.update_else_get(key, current.version, &candidate).await? {
                UpdateOutcome::Applied(version) => {
                    return Ok(Versioned {
                        record: candidate,
                        version,
                    });
                }
                UpdateOutcome::Conflict(latest) => {
                    if !policy.allows_retry_after(attempts) {
                        return Err(StoreError::RetriesExhausted {
                            key: key.to_string(),
                            attempts,
                        });
                    }
                    debug!(key, attempts, "conditional write lost, retrying on fresh record");
                    current = latest;
                }
            }
        }
    }

    /// Write many records as one logical batch.
    ///
    /// The batch is split into `max_txn_ops`-sized transactions executed
    /// concurrently; every chunk runs to completion. A failing chunk
    /// fails the overall call, but chunks that already committed are not
    /// rolled back; callers must tolerate partial batch application.
    pub async fn put_multi<R: StoreRecord>(&self, records: &[R]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            entries.push((record.key(), serde_json::to_vec(record)?));
        }
        let chunk_size = self.kv.max_txn_ops().max(1);
        let results = join_all(entries.chunks(chunk_size).map(|chunk| self.kv.txn_put(chunk))).await;
        results.into_iter().collect::<Result<Vec<()>, _>>()?;
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}
