//! End-to-end scenarios exercising the composite cache the way a real
//! caller would, driven by a manually-advanced clock and a scratch
//! directory.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tandem_cache::{Cache, CacheOptions, CachePath, DiskOptions, Json, ManualClock, MemoryOptions};
use tempfile::tempdir;

fn build_with_limit(dir: PathBuf, size_limit: u64) -> (Cache<String, Bytes>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let options = CacheOptions::new(
        MemoryOptions::default(),
        DiskOptions::<String>::new(CachePath::Custom(dir)).with_size_limit(size_limit),
    );
    let cache = Cache::new(options, clock.clone());
    cache.prepare().unwrap();
    (cache, clock)
}

fn build(dir: PathBuf) -> (Cache<String, Bytes>, Arc<ManualClock>) {
    build_with_limit(dir, tandem_cache::DEFAULT_SIZE_LIMIT)
}

/// A store is visible to get() before the flush has put anything on
/// disk, and stays visible once it has.
#[tokio::test]
async fn store_visible_before_flush() {
    let dir = tempdir().unwrap();
    let (cache, clock) = build(dir.path().to_path_buf());

    cache.store("empty".to_string(), Bytes::new()).await;
    assert_eq!(cache.value(&"empty".to_string()).await.unwrap(), Some(Bytes::new()));
    assert!(!cache.url(&"empty".to_string()).unwrap().exists());

    clock.advance(Duration::from_millis(500));
    assert!(!cache.url(&"empty".to_string()).unwrap().exists());

    clock.advance(Duration::from_millis(500));
    cache.wait_idle().await;

    assert!(cache.url(&"empty".to_string()).unwrap().exists());
    assert_eq!(cache.value(&"empty".to_string()).await.unwrap(), Some(Bytes::new()));
}

/// Store, flush, read back, then clear and confirm both tiers and the
/// directory end up empty.
#[tokio::test]
async fn clear_reaches_a_previously_flushed_value() {
    let dir = tempdir().unwrap();
    let (cache, clock) = build(dir.path().to_path_buf());

    cache.store("item0".to_string(), Bytes::from_static(b"1")).await;
    clock.advance(Duration::from_millis(1000));
    cache.wait_idle().await;
    assert_eq!(
        cache.value(&"item0".to_string()).await.unwrap(),
        Some(Bytes::from_static(b"1"))
    );

    cache.clear().await;
    clock.advance(Duration::from_millis(1000));
    cache.wait_idle().await;

    assert_eq!(cache.value(&"item0".to_string()).await.unwrap(), None);
    assert_eq!(cache.disk_total_count().await.unwrap(), 0);
    assert_eq!(cache.memory_len(), 0);
}

/// Once total allocated size exceeds the limit, the sweeper evicts by
/// oldest access-date down to 70% of the limit. Three single-byte items
/// each round up to one `BLOCK_SIZE` block, so a limit of
/// `3 * BLOCK_SIZE - 1` is exceeded by exactly one block's worth —
/// evicting the single oldest item brings the directory back under the
/// 70% target.
#[tokio::test]
async fn sweep_evicts_the_oldest_entry_by_access_date() {
    let dir = tempdir().unwrap();
    let size_limit = 3 * tandem_cache::BLOCK_SIZE - 1;
    let (cache, clock) = build_with_limit(dir.path().to_path_buf(), size_limit);

    cache.store("oldest".to_string(), Bytes::from_static(b"a")).await;
    cache.store("middle".to_string(), Bytes::from_static(b"b")).await;
    cache.store("newest".to_string(), Bytes::from_static(b"c")).await;
    clock.advance(Duration::from_millis(1000));
    cache.wait_idle().await;
    assert_eq!(cache.disk_total_count().await.unwrap(), 3);
    assert_eq!(cache.disk_total_allocated_size().await.unwrap(), 3 * tandem_cache::BLOCK_SIZE);

    let oldest_path = cache.url(&"oldest".to_string()).unwrap();
    let distant_past = std::time::SystemTime::UNIX_EPOCH + Duration::from_secs(1);
    let file = std::fs::OpenOptions::new().write(true).open(&oldest_path).unwrap();
    file.set_times(std::fs::FileTimes::new().set_accessed(distant_past)).unwrap();
    drop(file);

    // first sweep fires 10s after prepare()
    clock.advance(Duration::from_secs(10));

    let mut remaining = 3;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        remaining = cache.disk_total_count().await.unwrap();
        if remaining == 2 {
            break;
        }
    }

    assert_eq!(remaining, 2, "sweeper should have evicted exactly the aged entry");
    assert!(!oldest_path.exists());
    assert!(cache.url(&"middle".to_string()).unwrap().exists());
    assert!(cache.url(&"newest".to_string()).unwrap().exists());
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Manifest {
    name: String,
    revision: u32,
}

/// A structured (non-raw-bytes) value round-trips through the disk tier
/// via the `Json` codec wrapper, including across a fresh `Cache`
/// instance over the same directory (memory cold, disk warm).
#[tokio::test]
async fn structured_values_round_trip_through_a_cold_reopen() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::new());
    let options = CacheOptions::new(
        MemoryOptions::default(),
        DiskOptions::<String>::new(CachePath::Custom(dir.path().to_path_buf())),
    );
    let cache: Cache<String, Json<Manifest>> = Cache::new(options, clock.clone());
    cache.prepare().unwrap();

    let value = Json(Manifest {
        name: "widgets".to_string(),
        revision: 3,
    });
    cache.store("manifest".to_string(), value.clone()).await;
    clock.advance(Duration::from_millis(1000));
    cache.wait_idle().await;

    let reopened_options = CacheOptions::new(
        MemoryOptions::default(),
        DiskOptions::<String>::new(CachePath::Custom(dir.path().to_path_buf())),
    );
    let reopened: Cache<String, Json<Manifest>> = Cache::new(reopened_options, clock);
    reopened.prepare().unwrap();

    assert_eq!(reopened.memory_len(), 0);
    assert_eq!(reopened.value(&"manifest".to_string()).await.unwrap(), Some(value));
    assert_eq!(reopened.memory_len(), 1);
}
