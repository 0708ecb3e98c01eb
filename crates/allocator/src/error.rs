//! Allocation engine errors

use thiserror::Error;

use barrel_store::StoreError;

use crate::model::Ip;
use crate::pool::PoolError;

/// Errors surfaced by the fixed-IP allocation engine.
///
/// Missing records and lost conditional writes are expected conditions,
/// never panics; they come back as the domain variants below so callers
/// can branch on them.
#[derive(Debug, Error)]
pub enum AllocatorError {
    /// The address has no record, i.e. it is not fixed-allocated.
    #[error("fixed ip {0} is not allocated")]
    FixedIpNotAllocated(Ip),

    /// The address is assigned to a live consumer, or a concurrent
    /// operation won the conditional write.
    #[error("fixed ip {0} is in use")]
    IpInUse(Ip),

    /// The address still has borrowers and `force` was not set.
    #[error("fixed ip {0} is held by a borrower")]
    FixedIpHasBorrower(Ip),

    /// A bounded retry loop ran out of attempts under contention.
    #[error("max retry count exceeded updating fixed ip {0}")]
    MaxRetryCountExceeded(Ip),

    /// Every candidate pool failed to yield an address.
    #[error("no address available in pools: {}", .0.join(", "))]
    PoolsExhausted(Vec<String>),

    /// A state the engine's invariants rule out was observed anyway.
    #[error("critical error: {0}")]
    Critical(String),

    /// Propagated pool allocator failure
    #[error("pool allocator error: {0}")]
    Pool(#[from] PoolError),

    /// Record store failure with no domain meaning
    #[error("record store error: {0}")]
    Store(StoreError),
}
