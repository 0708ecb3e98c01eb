//! etcd record store backend
//!
//! Persists records under the shared `/barrel/...` namespace. etcd's
//! per-key `version` counter is the version token: it is 1 when a key is
//! created, increments on every modification, and resets when the key is
//! deleted and re-created, which matches the token contract exactly.
//! Conditional writes are etcd transactions comparing `version`; batched
//! writes are a single transaction subject to the server's max-txn-ops
//! cap.

use etcd_client::{
    Client, Compare, CompareOp, DeleteOptions, PutOptions, Txn, TxnOp, TxnOpResponse,
};
use tracing::debug;

use crate::error::StoreError;
use crate::kv::{CasOutcome, KvStore, Version, VersionedValue, DEFAULT_MAX_TXN_OPS};

/// etcd-backed [`KvStore`].
///
/// The wrapped client is cheap to clone (it shares one gRPC channel), so
/// every operation works on its own clone and the store itself is `Sync`.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    max_txn_ops: usize,
}

impl EtcdStore {
    /// Connect to an etcd cluster.
    ///
    /// # Arguments
    /// * `endpoints` - cluster endpoints, e.g. `["http://127.0.0.1:2379"]`
    pub async fn connect(endpoints: &[String]) -> Result<Self, StoreError> {
        let client = Client::connect(endpoints, None).await?;
        Ok(Self {
            client,
            max_txn_ops: DEFAULT_MAX_TXN_OPS,
        })
    }

    /// Wrap an already-connected client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            max_txn_ops: DEFAULT_MAX_TXN_OPS,
        }
    }

    /// Override the per-transaction operation cap, for clusters running
    /// with a non-default `--max-txn-ops`.
    #[must_use]
    pub fn with_max_txn_ops(mut self, max_txn_ops: usize) -> Self {
        self.max_txn_ops = max_txn_ops;
        self
    }
}

impl std::fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdStore")
            .field("max_txn_ops", &self.max_txn_ops)
            .finish()
    }
}

#[async_trait::async_trait]
impl KvStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<VersionedValue, StoreError> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await?;
        match resp.kvs().first() {
            Some(kv) => Ok(VersionedValue {
                value: kv.value().to_vec(),
                version: Version(kv.version()),
            }),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<Version, StoreError> {
        let mut client = self.client.clone();
        let options = PutOptions::new().with_prev_key();
        let resp = client.put(key, value, Some(options)).await?;
        // prev_key carries the pre-put version; the new token is prev + 1,
        // or the base token on first creation.
        let version = match resp.prev_key() {
            Some(prev) => Version(prev.version()).next(),
            None => Version::BASE,
        };
        debug!(key, %version, "put record");
        Ok(version)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        let resp = client.delete(key, None).await?;
        if resp.deleted() == 0 {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(())
    }

    async fn get_and_delete(&self, key: &str) -> Result<VersionedValue, StoreError> {
        let mut client = self.client.clone();
        let options = DeleteOptions::new().with_prev_key();
        let resp = client.delete(key, Some(options)).await?;
        match resp.prev_kvs().first() {
            Some(kv) => Ok(VersionedValue {
                value: kv.value().to_vec(),
                version: Version(kv.version()),
            }),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected: Version,
        value: Vec<u8>,
    ) -> Result<CasOutcome, StoreError> {
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when(vec![Compare::version(key, CompareOp::Equal, expected.0)])
            .and_then(vec![TxnOp::put(key, value, None)])
            .or_else(vec![TxnOp::get(key, None)]);
        let resp = client.txn(txn).await?;

        if resp.succeeded() {
            // etcd bumps the per-key version by exactly one per put.
            return Ok(CasOutcome::Applied(expected.next()));
        }

        let current = resp
            .op_responses()
            .into_iter()
            .find_map(|op| match op {
                TxnOpResponse::Get(get) => get.kvs().first().map(|kv| VersionedValue {
                    value: kv.value().to_vec(),
                    version: Version(kv.version()),
                }),
                _ => None,
            });
        match current {
            Some(current) => {
                debug!(key, expected = %expected, stored = %current.version, "conditional write lost");
                Ok(CasOutcome::Conflict(current))
            }
            // The compare failed and the fallback read saw nothing: the
            // key was deleted out from under the caller.
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn txn_put(&self, entries: &[(String, Vec<u8>)]) -> Result<(), StoreError> {
        if entries.len() > self.max_txn_ops {
            return Err(StoreError::TxnTooLarge(entries.len(), self.max_txn_ops));
        }
        let mut client = self.client.clone();
        let ops: Vec<TxnOp> = entries
            .iter()
            .map(|(key, value)| TxnOp::put(key.clone(), value.clone(), None))
            .collect();
        let txn = Txn::new().and_then(ops);
        client.txn(txn).await?;
        debug!(count = entries.len(), "batch committed");
        Ok(())
    }

    fn max_txn_ops(&self) -> usize {
        self.max_txn_ops
    }
}
