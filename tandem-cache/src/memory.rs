//! The memory tier: a thin concurrency envelope around the LRU map
//! whose mutations are ordered by the shared [`OperationQueue`]. The
//! synchronization is delegated entirely to [`crate::lru::LruMap`] and
//! the queue, so this type carries no lock of its own.

use crate::lru::LruMap;
use crate::queue::OperationQueue;
use std::hash::Hash;
use std::sync::Arc;

pub struct MemoryTier<K, V> {
    lru: LruMap<K, V>,
    queue: Arc<OperationQueue>,
}

impl<K, V> MemoryTier<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(count_limit: usize, cost_limit: u64, queue: Arc<OperationQueue>) -> Self {
        Self {
            lru: LruMap::new(count_limit, cost_limit),
            queue,
        }
    }

    /// Awaits the operation queue tail so a preceding `store` is visible
    /// before reading.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.queue.wait_for_tail().await;
        self.lru.get(key)
    }

    /// Synchronous variant used by the composite cache when it has
    /// already established ordering itself (e.g. from within a queued
    /// task, where awaiting the tail again would deadlock against the
    /// link currently running).
    pub fn get_no_wait(&self, key: &K) -> Option<V> {
        self.lru.get(key)
    }

    pub fn store(&self, key: K, value: V, cost: i64) {
        self.lru.set(key, value, cost);
    }

    pub fn remove(&self, key: &K) {
        self.lru.remove(key);
    }

    pub fn clear(&self) {
        self.lru.clear();
    }

    pub fn len(&self) -> usize {
        self.lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    pub fn total_cost(&self) -> u64 {
        self.lru.total_cost()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn store_then_get_round_trips() {
        let queue = Arc::new(OperationQueue::new());
        let tier = MemoryTier::<&str, i32>::new(0, 0, queue);
        tier.store("a", 1, 0);
        assert_eq!(tier.get(&"a").await, Some(1));
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let queue = Arc::new(OperationQueue::new());
        let tier = MemoryTier::<&str, i32>::new(0, 0, queue);
        tier.store("a", 1, 0);
        tier.store("b", 2, 0);
        tier.remove(&"a");
        assert_eq!(tier.get(&"a").await, None);
        tier.clear();
        assert_eq!(tier.get(&"b").await, None);
        assert!(tier.is_empty());
    }
}
