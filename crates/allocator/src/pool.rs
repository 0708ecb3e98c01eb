//! Pool allocator seam
//!
//! The external service that hands out and reclaims raw addresses from
//! named pools. The engine never inspects pool internals; it calls
//! through this trait and propagates errors as-is. The concrete network
//! backend implements it, and tests use the mock implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Ip;

/// A named, CIDR-scoped source of raw addresses (read-only reference).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    /// CIDR the pool spans
    pub cidr: String,
    /// Pool name/identifier
    pub pool_id: String,
    /// Gateway address for the pool
    pub gateway: String,
}

/// Errors reported by the pool allocator.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No pool matches the requested identifier, CIDR, or network
    #[error("pool not found: {0}")]
    PoolNotFound(String),

    /// The requested address is already taken in its pool
    #[error("address {0} is already taken")]
    AddressTaken(String),

    /// The pool has no free address left
    #[error("no address available in pool {0}")]
    PoolExhausted(String),

    /// Transport or backend failure
    #[error("pool backend error: {0}")]
    Backend(String),
}

/// Operations the allocation engine requires from the pool allocator.
#[async_trait]
pub trait PoolAllocator: Send + Sync {
    /// Reserve a specific raw address in its pool.
    async fn alloc_ip(&self, ip: &Ip) -> Result<(), PoolError>;

    /// Reserve any free raw address from the named pool and return it.
    async fn alloc_ip_from_pool(&self, pool_id: &str) -> Result<String, PoolError>;

    /// Release a raw address back to its pool.
    async fn unalloc_ip(&self, ip: &Ip) -> Result<(), PoolError>;

    /// Look up a pool by its identifier.
    async fn get_pool_by_id(&self, pool_id: &str) -> Result<Pool, PoolError>;

    /// Look up a pool by its CIDR.
    async fn get_pool_by_cidr(&self, cidr: &str) -> Result<Pool, PoolError>;

    /// Look up several pools by CIDR, preserving order.
    async fn get_pools_by_cidrs(&self, cidrs: &[String]) -> Result<Vec<Pool>, PoolError>;

    /// The default pool for the address family.
    async fn get_default_pool(&self, ipv6: bool) -> Result<Pool, PoolError>;

    /// Pools attached to a named network.
    async fn get_pools_by_network_name(&self, name: &str) -> Result<Vec<Pool>, PoolError>;
}
