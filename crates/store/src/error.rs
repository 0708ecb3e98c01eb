//! Record store errors

use thiserror::Error;

/// Errors that can occur when reading or writing records.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key is not present in the store. Absence of a record is a
    /// legitimate state, not a failure; callers branch on this variant.
    #[error("key not found: {0}")]
    NotFound(String),

    /// A conditional write kept losing against concurrent writers until
    /// the retry policy ran out of attempts.
    #[error("conditional write on {key} not applied after {attempts} attempts")]
    RetriesExhausted {
        /// Key the write was retried against
        key: String,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// A single transaction was handed more operations than the backend
    /// accepts. `put_multi` chunks around this; hitting it means a chunk
    /// was built larger than `max_txn_ops`.
    #[error("transaction of {0} operations exceeds the backend limit of {1}")]
    TxnTooLarge(usize, usize),

    /// Record (de)serialization failed
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// etcd transport or server error
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    /// Backend-specific failure that has no richer mapping
    #[error("backend error: {0}")]
    Backend(String),
}
