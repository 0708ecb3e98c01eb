//! Fixed-IP allocation engine
//!
//! The state machine that keeps an address attached to its consumer
//! across reconnects and restarts. Per identity the states are:
//! no record (unallocated) → record with `IN_USE` clear (allocated,
//! free) ⇄ record with `IN_USE` set (allocated, in use) → no record.
//! Orthogonally, `borrowers` may be non-empty in either allocated
//! state.
//!
//! There are no in-process locks here; every cross-process safety
//! property comes from the record store's per-key conditional writes.
//! Multiple engine instances, one per host process, operate on the same
//! store and pool allocator concurrently.

use std::sync::Arc;

use tracing::{debug, info, warn};

use barrel_store::{RetryPolicy, Store, StoreError, UpdateOutcome, Versioned};

use crate::error::AllocatorError;
use crate::model::{Container, Ip, IpRecord, IpStatus};
use crate::pool::{Pool, PoolAllocator};

/// Attempt budget for borrower-list updates. Bounded so borrow/return
/// trade liveness under heavy contention for bounded latency.
const BORROW_RETRY_COUNT: u32 = 3;

/// The fixed-IP allocation engine.
///
/// Cloning is cheap; clones share the store and pool allocator.
#[derive(Clone)]
pub struct FixedIpAllocator {
    store: Store,
    pool: Arc<dyn PoolAllocator>,
}

impl FixedIpAllocator {
    /// Build an engine from already-constructed dependencies.
    pub fn new(store: Store, pool: Arc<dyn PoolAllocator>) -> Self {
        Self { store, pool }
    }

    /// Fixed-allocate `ip`: reserve the raw address in its pool and
    /// persist a fresh record.
    ///
    /// Idempotent while the address is not in use: a second call on an
    /// allocated-but-free address succeeds without touching the pool.
    /// An in-use address fails with `IpInUse`.
    ///
    /// The pool reservation and the record write are two systems with no
    /// shared transaction: if the record write fails after the pool
    /// reservation succeeded, the raw address stays reserved pool-side
    /// with no record. That window is logged and surfaced as the write
    /// error.
    pub async fn alloc_fixed_ip(&self, ip: &Ip) -> Result<(), AllocatorError> {
        match self.fetch(ip).await? {
            Some(existing) if existing.record.status.is_in_use() => {
                Err(AllocatorError::IpInUse(ip.clone()))
            }
            Some(_) => {
                debug!("Fixed IP {} already allocated, nothing to do", ip);
                Ok(())
            }
            None => {
                self.pool.alloc_ip(ip).await?;
                let record = IpRecord::new(ip.clone());
                if let Err(err) = self.store.put(&record).await {
                    warn!(
                        "Fixed IP {} reserved in its pool but the record write failed; \
                         the raw address is leaked until reconciled: {}",
                        ip, err
                    );
                    return Err(AllocatorError::Store(err));
                }
                info!("Allocated fixed IP {}", ip);
                Ok(())
            }
        }
    }

    /// Mark `ip` as in use by a live consumer.
    ///
    /// Exactly one conditional write; losing a race against a concurrent
    /// assign (or any other writer) is reported as `IpInUse`, a
    /// legitimate business outcome the caller decides how to handle.
    pub async fn assign_fixed_ip(&self, ip: &Ip) -> Result<(), AllocatorError> {
        let current = self.fetch_required(ip).await?;
        if current.record.status.is_in_use() {
            return Err(AllocatorError::IpInUse(ip.clone()));
        }
        let mut updated = current.record.clone();
        updated.status.insert(IpStatus::IN_USE);
        match self
            .store
            .update_else_get(&ip.record_key(), current.version, &updated)
            .await
            .map_err(|err| store_error(ip, err))?
        {
            UpdateOutcome::Applied(_) => {
                info!("Assigned fixed IP {}", ip);
                Ok(())
            }
            UpdateOutcome::Conflict(_) => Err(AllocatorError::IpInUse(ip.clone())),
        }
    }

    /// Clear the in-use mark on `ip`. Idempotent: unassigning a free
    /// address succeeds. Never deletes the record.
    pub async fn unassign_fixed_ip(&self, ip: &Ip) -> Result<(), AllocatorError> {
        let current = self.fetch_required(ip).await?;
        if !current.record.status.is_in_use() {
            return Ok(());
        }
        let mut updated = current.record.clone();
        updated.status.remove(IpStatus::IN_USE);
        match self
            .store
            .update_else_get(&ip.record_key(), current.version, &updated)
            .await
            .map_err(|err| store_error(ip, err))?
        {
            UpdateOutcome::Applied(_) => {
                info!("Unassigned fixed IP {}", ip);
                Ok(())
            }
            UpdateOutcome::Conflict(_) => Err(AllocatorError::IpInUse(ip.clone())),
        }
    }

    /// Record `container` as a non-owning holder of `ip`.
    ///
    /// Does not require the address to be in use. Borrowing twice by the
    /// same container keeps two equal entries; they all disappear with
    /// one return.
    pub async fn borrow_fixed_ip(
        &self,
        ip: &Ip,
        container: Container,
    ) -> Result<(), AllocatorError> {
        self.store
            .update::<IpRecord, _>(
                &ip.record_key(),
                RetryPolicy::Attempts(BORROW_RETRY_COUNT),
                |record| record.borrowers.push(container.clone()),
            )
            .await
            .map_err(|err| store_error(ip, err))?;
        debug!("Container {} borrows fixed IP {}", container.id, ip);
        Ok(())
    }

    /// Drop every borrow entry of `container` on `ip`. A no-op when the
    /// container holds none.
    pub async fn return_fixed_ip(
        &self,
        ip: &Ip,
        container: &Container,
    ) -> Result<(), AllocatorError> {
        self.store
            .update::<IpRecord, _>(
                &ip.record_key(),
                RetryPolicy::Attempts(BORROW_RETRY_COUNT),
                |record| record.borrowers.retain(|holder| holder != container),
            )
            .await
            .map_err(|err| store_error(ip, err))?;
        debug!("Container {} returned fixed IP {}", container.id, ip);
        Ok(())
    }

    /// Un-allocate `ip`: delete its record and release the raw address
    /// back to its pool.
    ///
    /// Refused while the address is in use, and (unless `force`) while
    /// any borrower remains. The record is first tombstoned
    /// (`IN_USE | RETIRED`) with a conditional write, which closes the
    /// race window: a concurrent assign fails with `IpInUse` until the
    /// record is gone.
    ///
    /// The delete and the pool release are two systems with no shared
    /// transaction: if the release fails after the delete, the record is
    /// gone and the raw address stays reserved pool-side. That window is
    /// logged and surfaced as the release error.
    pub async fn unalloc_fixed_ip(&self, ip: &Ip, force: bool) -> Result<(), AllocatorError> {
        let current = self.fetch_required(ip).await?;
        if current.record.status.is_in_use() {
            return Err(AllocatorError::IpInUse(ip.clone()));
        }
        if !force && !current.record.borrowers.is_empty() {
            return Err(AllocatorError::FixedIpHasBorrower(ip.clone()));
        }

        let mut tombstone = current.record.clone();
        tombstone.status.insert(IpStatus::IN_USE | IpStatus::RETIRED);
        match self
            .store
            .update_else_get(&ip.record_key(), current.version, &tombstone)
            .await
            .map_err(|err| store_error(ip, err))?
        {
            UpdateOutcome::Applied(_) => {}
            UpdateOutcome::Conflict(_) => return Err(AllocatorError::IpInUse(ip.clone())),
        }

        match self.store.delete(&ip.record_key()).await {
            Ok(()) => {}
            // We hold the tombstone; nobody else may delete underneath it.
            Err(StoreError::NotFound(key)) => {
                return Err(AllocatorError::Critical(format!(
                    "tombstoned record {key} vanished before delete"
                )));
            }
            Err(err) => return Err(AllocatorError::Store(err)),
        }

        if let Err(err) = self.pool.unalloc_ip(ip).await {
            warn!(
                "Fixed IP {} record deleted but the pool release failed; \
                 the raw address is leaked until reconciled: {}",
                ip, err
            );
            return Err(err.into());
        }
        info!("Unallocated fixed IP {}", ip);
        Ok(())
    }

    /// Fixed-allocate an address from the first candidate pool that can
    /// provide one.
    ///
    /// Pools are tried in order; the first success wins. Exhausting every
    /// candidate reports the pools tried. If the record write fails after
    /// an address was reserved, the address is best-effort released back
    /// to its pool before the write error is returned.
    pub async fn alloc_fixed_ip_from_pools(&self, pools: &[Pool]) -> Result<Ip, AllocatorError> {
        let mut tried = Vec::with_capacity(pools.len());
        let mut allocated = None;
        for pool in pools {
            match self.pool.alloc_ip_from_pool(&pool.pool_id).await {
                Ok(address) => {
                    allocated = Some(Ip::new(pool.pool_id.clone(), address));
                    break;
                }
                Err(err) => {
                    debug!("Pool {} yielded no address: {}", pool.pool_id, err);
                    tried.push(pool.pool_id.clone());
                }
            }
        }
        let ip = allocated.ok_or(AllocatorError::PoolsExhausted(tried))?;

        let record = IpRecord::new(ip.clone());
        if let Err(err) = self.store.put(&record).await {
            if let Err(release_err) = self.pool.unalloc_ip(&ip).await {
                warn!(
                    "Fixed IP {} could not be recorded nor released; \
                     the raw address is leaked until reconciled: {}",
                    ip, release_err
                );
            }
            return Err(AllocatorError::Store(err));
        }
        info!("Allocated fixed IP {} from pool {}", ip, ip.pool_id);
        Ok(ip)
    }

    /// Fetch the record for `ip`, mapping "no record" to `None`.
    async fn fetch(&self, ip: &Ip) -> Result<Option<Versioned<IpRecord>>, AllocatorError> {
        match self.store.get::<IpRecord>(&ip.record_key()).await {
            Ok(current) => Ok(Some(current)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(AllocatorError::Store(err)),
        }
    }

    /// Fetch the record for `ip`; "no record" means the address is not
    /// fixed-allocated and is an error on these paths.
    async fn fetch_required(&self, ip: &Ip) -> Result<Versioned<IpRecord>, AllocatorError> {
        self.fetch(ip)
            .await?
            .ok_or_else(|| AllocatorError::FixedIpNotAllocated(ip.clone()))
    }
}

impl std::fmt::Debug for FixedIpAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedIpAllocator").finish_non_exhaustive()
    }
}

/// Translate store failures into their domain meaning: a missing record
/// means "not fixed-allocated", an exhausted bounded retry means the
/// contention budget ran out.
fn store_error(ip: &Ip, err: StoreError) -> AllocatorError {
    match err {
        StoreError::NotFound(_) => AllocatorError::FixedIpNotAllocated(ip.clone()),
        StoreError::RetriesExhausted { .. } => AllocatorError::MaxRetryCountExceeded(ip.clone()),
        other => AllocatorError::Store(other),
    }
}
