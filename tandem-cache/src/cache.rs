//! The composite cache: joins the memory and disk tiers, owns the
//! value⇄bytes conversion, and performs read-through population of the
//! memory tier on disk hits.
//!
//! `store`/`remove`/`clear` forward into both tiers from within a
//! single queued operation. Neither tier's own mutator actually blocks
//! on I/O — the memory tier only locks a mutex and the disk tier only
//! appends to its staging log and arms the background flush — so both
//! tiers applying "concurrently" falls out of both calls being
//! synchronous; the real I/O happens later in tasks the flush scheduler
//! has already spawned off this queued operation.

use crate::clock::{Clock, SystemClock};
use crate::disk::DiskTier;
use crate::error::{CacheError, Result};
use crate::memory::MemoryTier;
use crate::options::CacheOptions;
use crate::queue::OperationQueue;
use crate::value::CacheValue;
use bytes::Bytes;
use std::future::Future;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::Arc;

/// A two-tier cache over keys `K` and values `V`. Cloning shares the
/// same underlying tiers and queue.
#[derive(Clone)]
pub struct Cache<K, V> {
    memory: Arc<MemoryTier<K, V>>,
    disk: DiskTier<K>,
    queue: Arc<OperationQueue>,
    clock: Arc<dyn Clock>,
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: CacheValue,
{
    pub fn new(options: CacheOptions<K>, clock: Arc<dyn Clock>) -> Self {
        let queue = Arc::new(OperationQueue::new());
        let memory = Arc::new(MemoryTier::new(
            options.memory.count_limit,
            options.memory.cost_limit,
            queue.clone(),
        ));
        let disk = DiskTier::new(options.disk, clock.clone(), queue.clone());

        Self {
            memory,
            disk,
            queue,
            clock,
        }
    }

    pub fn with_system_clock(options: CacheOptions<K>) -> Self {
        Self::new(options, Arc::new(SystemClock))
    }

    /// Resolves the disk tier's backing directory and arms its
    /// sweeper. Must be called once before any mutator or reader.
    pub fn prepare(&self) -> Result<()> {
        self.disk.prepare()
    }

    /// Queries memory first; on miss, consults disk, decodes, and
    /// best-effort populates memory before returning.
    pub async fn value(&self, key: &K) -> Result<Option<V>> {
        self.queue.wait_for_tail().await;

        if let Some(value) = self.memory.get_no_wait(key) {
            return Ok(Some(value));
        }

        let now = self.clock.wall_now();
        let Some(bytes) = self.disk.get(key, now).await? else {
            return Ok(None);
        };

        let value = V::from_bytes(bytes.to_vec()).map_err(CacheError::from)?;
        self.memory
            .store(key.clone(), value.clone(), value.cache_cost() as i64);
        Ok(Some(value))
    }

    /// Enqueues a store against both tiers. The returned future
    /// resolves once both halves have applied; dropping it does not
    /// cancel the underlying work.
    pub fn store(&self, key: K, value: V) -> impl Future<Output = ()> + 'static {
        let memory = self.memory.clone();
        let disk = self.disk.clone();

        self.queue.enqueue(move || async move {
            let cost = value.cache_cost() as i64;
            match value.to_bytes() {
                Ok(bytes) => disk.store(key.clone(), Bytes::from(bytes)),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "value codec failed encoding for disk; memory half still applied"
                    );
                }
            }
            memory.store(key, value, cost);
        })
    }

    pub fn remove(&self, key: K) -> impl Future<Output = ()> + 'static {
        let memory = self.memory.clone();
        let disk = self.disk.clone();

        self.queue.enqueue(move || async move {
            disk.remove(key.clone());
            memory.remove(&key);
        })
    }

    pub fn clear(&self) -> impl Future<Output = ()> + 'static {
        let memory = self.memory.clone();
        let disk = self.disk.clone();

        self.queue.enqueue(move || async move {
            disk.clear();
            memory.clear();
        })
    }

    pub fn url(&self, key: &K) -> Option<PathBuf> {
        self.disk.url(key)
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn memory_total_cost(&self) -> u64 {
        self.memory.total_cost()
    }

    pub async fn disk_total_count(&self) -> Result<u64> {
        self.disk.total_count().await
    }

    pub async fn disk_total_size(&self) -> Result<u64> {
        self.disk.total_size().await
    }

    pub async fn disk_total_allocated_size(&self) -> Result<u64> {
        self.disk.total_allocated_size().await
    }

    /// Awaits the disk tier's most recently armed flush chain. Useful in
    /// tests that drive a manual clock and need to wait for the
    /// resulting background flush to finish before asserting.
    pub async fn wait_idle(&self) {
        self.disk.wait_idle().await;
    }
}
