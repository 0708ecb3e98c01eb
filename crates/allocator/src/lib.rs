//! Fixed-IP allocation for container hosts
//!
//! Containers keep a stable address across reconnects, restarts, and
//! deletions even though the underlying pool allocator only hands out
//! ephemeral addresses. Every barrel process shares one versioned
//! record store (see `barrel-store`), so all bookkeeping stays correct
//! under concurrent, uncoordinated access from different hosts.
//!
//! The proxy's container-lifecycle handlers and the network-plugin IPAM
//! adapter drive the [`FixedIpAllocator`] surface; the pool allocator
//! itself is consumed through the [`PoolAllocator`] trait and never
//! inspected.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use barrel_allocator::{FixedIpAllocator, Ip};
//! use barrel_store::{EtcdStore, Store};
//!
//! # async fn example(pool: Arc<dyn barrel_allocator::PoolAllocator>)
//! #     -> Result<(), Box<dyn std::error::Error>> {
//! let backend = EtcdStore::connect(&["http://127.0.0.1:2379".to_string()]).await?;
//! let allocator = FixedIpAllocator::new(Store::new(Arc::new(backend)), pool);
//!
//! let ip = Ip::new("poolID", "10.10.10.10");
//! allocator.alloc_fixed_ip(&ip).await?;
//! allocator.assign_fixed_ip(&ip).await?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
#[cfg(test)]
mod engine_test;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod model;
pub mod pool;

pub use engine::FixedIpAllocator;
pub use error::AllocatorError;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockPoolAllocator;
pub use model::{Container, ContainerRecord, Ip, IpRecord, IpStatus, Network};
pub use pool::{Pool, PoolAllocator, PoolError};
