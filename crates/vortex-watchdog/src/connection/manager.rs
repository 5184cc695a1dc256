//! Per-tunnel pool registry

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::pool::{ConnectionPool, PoolStatus};

/// Maps tunnel names to their connection pools
///
/// Constructed once by the process entry point and handed to whoever needs
/// pools. Pools are created lazily on first request.
pub struct ConnectionPoolManager {
    /// Pools indexed by tunnel name
    pools: DashMap<String, Arc<ConnectionPool>>,
    /// Reuse probability for newly created pools
    reuse_probability: f64,
}

impl ConnectionPoolManager {
    /// Create an empty manager
    pub fn new(reuse_probability: f64) -> Self {
        Self {
            pools: DashMap::new(),
            reuse_probability,
        }
    }

    /// Get the pool for a tunnel, creating it with `pool_size` if absent.
    ///
    /// Creation happens under the map entry lock, so concurrent callers for
    /// the same name always receive the same pool. An existing pool keeps
    /// its original size.
    pub fn get_pool(&self, tunnel_name: &str, pool_size: usize) -> Arc<ConnectionPool> {
        let entry = self
            .pools
            .entry(tunnel_name.to_string())
            .or_insert_with(|| {
                tracing::info!(
                    "Created connection pool for tunnel: {} (size: {})",
                    tunnel_name,
                    pool_size
                );
                Arc::new(ConnectionPool::new(pool_size, self.reuse_probability))
            });
        Arc::clone(&entry)
    }

    /// Get an existing pool without creating one
    pub fn existing_pool(&self, tunnel_name: &str) -> Option<Arc<ConnectionPool>> {
        self.pools.get(tunnel_name).map(|r| Arc::clone(&r))
    }

    /// Drop the pool of a tunnel that is no longer configured
    pub fn remove_pool(&self, tunnel_name: &str) -> Option<Arc<ConnectionPool>> {
        let removed = self.pools.remove(tunnel_name).map(|(_, pool)| pool);
        if removed.is_some() {
            tracing::info!("Removed connection pool for tunnel: {}", tunnel_name);
        }
        removed
    }

    /// Names of all managed tunnels
    pub fn tunnel_names(&self) -> Vec<String> {
        self.pools.iter().map(|r| r.key().clone()).collect()
    }

    /// Status of every pool, keyed by tunnel name
    pub fn get_all_status(&self) -> BTreeMap<String, PoolStatus> {
        // Collect handles first so no map lock is held while pools lock
        let pools: Vec<(String, Arc<ConnectionPool>)> = self
            .pools
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();

        pools
            .into_iter()
            .map(|(name, pool)| (name, pool.get_pool_status()))
            .collect()
    }

    /// Number of managed pools
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Check if no pools exist
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

impl Default for ConnectionPoolManager {
    fn default() -> Self {
        Self::new(0.7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_pool_creates_once() {
        let manager = ConnectionPoolManager::default();
        let a = manager.get_pool("edge-1", 4);
        let b = manager.get_pool("edge-1", 16);

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.pool_size(), 4);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_pools_are_independent() {
        let manager = ConnectionPoolManager::new(0.0);
        manager.get_pool("a", 2).create_connection();
        manager.get_pool("b", 2);

        let status = manager.get_all_status();
        assert_eq!(status.len(), 2);
        assert_eq!(status["a"].active_connections, 1);
        assert_eq!(status["b"].active_connections, 0);
    }

    #[test]
    fn test_remove_pool() {
        let manager = ConnectionPoolManager::default();
        manager.get_pool("gone", 2);
        assert!(manager.remove_pool("gone").is_some());
        assert!(manager.remove_pool("gone").is_none());
        assert!(manager.existing_pool("gone").is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_concurrent_get_pool_yields_single_instance() {
        let manager = Arc::new(ConnectionPoolManager::default());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || manager.get_pool("shared", 8))
            })
            .collect();

        let pools: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(pools.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(manager.len(), 1);
    }
}
