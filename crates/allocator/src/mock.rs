//! Mock pool allocator for unit testing
//!
//! Stores pools and allocations in memory and can be configured to
//! reproduce failure scenarios (exhausted pools, injected release
//! failures) without a running network backend.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::model::Ip;
use crate::pool::{Pool, PoolAllocator, PoolError};

/// Mock [`PoolAllocator`] for testing.
///
/// Clones share state, so a test can hand the allocator to the engine
/// and keep a handle for setup and assertions.
#[derive(Clone, Default)]
pub struct MockPoolAllocator {
    pools: Arc<Mutex<HashMap<String, Pool>>>,
    available: Arc<Mutex<HashMap<String, Vec<String>>>>,
    allocated: Arc<Mutex<HashSet<(String, String)>>>,
    defaults: Arc<Mutex<HashMap<bool, String>>>,
    network_pools: Arc<Mutex<HashMap<String, Vec<String>>>>,
    failing_releases: Arc<Mutex<HashSet<(String, String)>>>,
}

impl MockPoolAllocator {
    /// Create an empty mock allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool (for test setup).
    pub fn add_pool(&self, pool: Pool) {
        self.pools
            .lock()
            .unwrap()
            .insert(pool.pool_id.clone(), pool);
    }

    /// Set the free addresses a pool hands out, in order (for test setup).
    pub fn set_available(&self, pool_id: impl Into<String>, addresses: Vec<String>) {
        self.available.lock().unwrap().insert(pool_id.into(), addresses);
    }

    /// Mark a pool as the default for an address family (for test setup).
    pub fn set_default_pool(&self, ipv6: bool, pool_id: impl Into<String>) {
        self.defaults.lock().unwrap().insert(ipv6, pool_id.into());
    }

    /// Attach pools to a network name (for test setup).
    pub fn set_network_pools(&self, name: impl Into<String>, pool_ids: Vec<String>) {
        self.network_pools
            .lock()
            .unwrap()
            .insert(name.into(), pool_ids);
    }

    /// Make releasing this address fail (for test setup).
    pub fn fail_release_of(&self, ip: &Ip) {
        self.failing_releases
            .lock()
            .unwrap()
            .insert((ip.pool_id.clone(), ip.address.clone()));
    }

    /// Whether the address is currently allocated pool-side (for test
    /// assertions).
    pub fn is_allocated(&self, ip: &Ip) -> bool {
        self.allocated
            .lock()
            .unwrap()
            .contains(&(ip.pool_id.clone(), ip.address.clone()))
    }

    /// Number of addresses currently allocated pool-side (for test
    /// assertions).
    pub fn allocated_count(&self) -> usize {
        self.allocated.lock().unwrap().len()
    }
}

impl std::fmt::Debug for MockPoolAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPoolAllocator")
            .field("allocated", &self.allocated_count())
            .finish()
    }
}

#[async_trait]
impl PoolAllocator for MockPoolAllocator {
    async fn alloc_ip(&self, ip: &Ip) -> Result<(), PoolError> {
        if !self.pools.lock().unwrap().contains_key(&ip.pool_id) {
            return Err(PoolError::PoolNotFound(ip.pool_id.clone()));
        }
        let entry = (ip.pool_id.clone(), ip.address.clone());
        {
            let mut allocated = self.allocated.lock().unwrap();
            if allocated.contains(&entry) {
                return Err(PoolError::AddressTaken(ip.address.clone()));
            }
            allocated.insert(entry);
        }
        if let Some(free) = self.available.lock().unwrap().get_mut(&ip.pool_id) {
            free.retain(|address| address != &ip.address);
        }
        Ok(())
    }

    async fn alloc_ip_from_pool(&self, pool_id: &str) -> Result<String, PoolError> {
        if !self.pools.lock().unwrap().contains_key(pool_id) {
            return Err(PoolError::PoolNotFound(pool_id.to_string()));
        }
        let address = {
            let mut available = self.available.lock().unwrap();
            available
                .get_mut(pool_id)
                .filter(|addresses| !addresses.is_empty())
                .map(|addresses| addresses.remove(0))
        };
        match address {
            Some(address) => {
                self.allocated
                    .lock()
                    .unwrap()
                    .insert((pool_id.to_string(), address.clone()));
                Ok(address)
            }
            None => Err(PoolError::PoolExhausted(pool_id.to_string())),
        }
    }

    async fn unalloc_ip(&self, ip: &Ip) -> Result<(), PoolError> {
        let entry = (ip.pool_id.clone(), ip.address.clone());
        if self.failing_releases.lock().unwrap().contains(&entry) {
            return Err(PoolError::Backend(format!(
                "injected release failure: {ip}"
            )));
        }
        if !self.allocated.lock().unwrap().remove(&entry) {
            return Err(PoolError::Backend(format!("address not allocated: {ip}")));
        }
        if let Some(free) = self.available.lock().unwrap().get_mut(&ip.pool_id) {
            free.push(ip.address.clone());
        }
        Ok(())
    }

    async fn get_pool_by_id(&self, pool_id: &str) -> Result<Pool, PoolError> {
        self.pools
            .lock()
            .unwrap()
            .get(pool_id)
            .cloned()
            .ok_or_else(|| PoolError::PoolNotFound(pool_id.to_string()))
    }

    async fn get_pool_by_cidr(&self, cidr: &str) -> Result<Pool, PoolError> {
        self.pools
            .lock()
            .unwrap()
            .values()
            .find(|pool| pool.cidr == cidr)
            .cloned()
            .ok_or_else(|| PoolError::PoolNotFound(cidr.to_string()))
    }

    async fn get_pools_by_cidrs(&self, cidrs: &[String]) -> Result<Vec<Pool>, PoolError> {
        let mut pools = Vec::with_capacity(cidrs.len());
        for cidr in cidrs {
            pools.push(self.get_pool_by_cidr(cidr).await?);
        }
        Ok(pools)
    }

    async fn get_default_pool(&self, ipv6: bool) -> Result<Pool, PoolError> {
        let pool_id = self
            .defaults
            .lock()
            .unwrap()
            .get(&ipv6)
            .cloned()
            .ok_or_else(|| PoolError::PoolNotFound("default".to_string()))?;
        self.get_pool_by_id(&pool_id).await
    }

    async fn get_pools_by_network_name(&self, name: &str) -> Result<Vec<Pool>, PoolError> {
        let pool_ids = self
            .network_pools
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| PoolError::PoolNotFound(name.to_string()))?;
        let mut pools = Vec::with_capacity(pool_ids.len());
        for pool_id in &pool_ids {
            pools.push(self.get_pool_by_id(pool_id).await?);
        }
        Ok(pools)
    }
}
