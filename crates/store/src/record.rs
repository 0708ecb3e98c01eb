//! Record codec
//!
//! Maps a domain object to a store key and a JSON value. The version
//! token is carried alongside the decoded record, never inside it.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::kv::Version;

/// A domain object that can be persisted as a record.
///
/// Implementors derive serde and supply the key their identity maps to.
/// The same record type must always derive the same key; keys are the
/// unit of optimistic concurrency.
pub trait StoreRecord: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Store key this record is persisted under.
    fn key(&self) -> String;
}

/// A decoded record paired with the version token it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<R> {
    /// The decoded record
    pub record: R,
    /// Version token, valid for the next conditional write only
    pub version: Version,
}
