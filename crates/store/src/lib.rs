//! Versioned record store
//!
//! A key/value record store where every record carries an opaque version
//! token, shared by every barrel process on every container host. All
//! cross-process safety in the allocator layer comes from this crate's
//! per-key conditional writes; there are no in-process locks above it.
//!
//! The store is split into two layers:
//!
//! - [`KvStore`]: the raw backend seam with byte values, version tokens,
//!   single-key compare-and-put, and single-transaction batched writes.
//!   [`EtcdStore`] is the production backend; [`MemoryStore`] (behind the
//!   `test-util` feature) is the in-process fake used in tests.
//! - [`Store`]: the typed wrapper with the JSON codec via [`StoreRecord`],
//!   decoded conflict results, a retrying `update` with a selectable
//!   [`RetryPolicy`], and chunked concurrent `put_multi`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use barrel_store::{EtcdStore, Store};
//!
//! # async fn example() -> Result<(), barrel_store::StoreError> {
//! let backend = EtcdStore::connect(&["http://127.0.0.1:2379".to_string()]).await?;
//! let store = Store::new(Arc::new(backend));
//! # let _ = store;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod etcd;
pub mod kv;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod record;
pub mod store;

pub use error::StoreError;
pub use etcd::EtcdStore;
pub use kv::{CasOutcome, KvStore, Version, VersionedValue, DEFAULT_MAX_TXN_OPS};
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryStore;
pub use record::{StoreRecord, Versioned};
pub use store::{RetryPolicy, Store, UpdateOutcome};
