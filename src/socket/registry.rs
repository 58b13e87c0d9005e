//! Named socket pools.
//!
//! Lets callers address a pool by name instead of passing its handle around.
//! The registry is an ordinary value; create one per client or share it.

use crate::base::neterror::NetError;
use crate::socket::config::PoolConfig;
use crate::socket::pool::{ClientSocketPool, PoolConn};
use crate::socket::transport::Transports;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Thread-safe name → pool map.
pub struct PoolRegistry<C, O> {
    pools: Arc<DashMap<String, ClientSocketPool<C, O>>>,
}

impl<C, O> Clone for PoolRegistry<C, O> {
    fn clone(&self) -> Self {
        Self { pools: Arc::clone(&self.pools) }
    }
}

impl<C: PoolConn, O: Send + 'static> Default for PoolRegistry<C, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: PoolConn, O: Send + 'static> PoolRegistry<C, O> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self { pools: Arc::new(DashMap::new()) }
    }

    /// Start a pool, registering it if `config.name` is set.
    ///
    /// Fails with [`NetError::PoolNameInUse`] if a running pool already has
    /// that name. A registered pool that has since stopped is replaced.
    pub fn start_pool(
        &self,
        config: PoolConfig,
        transports: Transports<C, O>,
    ) -> Result<ClientSocketPool<C, O>, NetError> {
        let Some(name) = config.name.clone() else {
            return Ok(ClientSocketPool::start(config, transports));
        };

        match self.pools.entry(name) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_closed() {
                    return Err(NetError::PoolNameInUse);
                }
                let pool = ClientSocketPool::start(config, transports);
                occupied.insert(pool.clone());
                Ok(pool)
            }
            Entry::Vacant(vacant) => {
                let pool = ClientSocketPool::start(config, transports);
                vacant.insert(pool.clone());
                Ok(pool)
            }
        }
    }

    /// Look up a running pool by name.
    pub fn find(&self, name: &str) -> Option<ClientSocketPool<C, O>> {
        let pool = self.pools.get(name).map(|p| p.clone())?;
        if pool.is_closed() {
            self.pools.remove_if(name, |_, p| p.is_closed());
            return None;
        }
        Some(pool)
    }

    /// Unregister a pool and shut it down. Returns false if no pool had
    /// that name.
    pub async fn stop(&self, name: &str) -> bool {
        let Some((_, pool)) = self.pools.remove(name) else {
            return false;
        };
        tracing::debug!(name, "stopping named socket pool");
        // Already stopped is as good as stopped.
        let _ = pool.shutdown().await;
        true
    }

    /// Names of all registered pools, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Get number of registered pools.
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
