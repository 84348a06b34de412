use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default disk tier size limit.
pub const DEFAULT_SIZE_LIMIT: u64 = 150 * 1024 * 1024;

/// Flush debounce.
pub const FLUSH_DELAY: Duration = Duration::from_secs(1);

/// First sweep fires this long after `prepare()`.
pub const FIRST_SWEEP_DELAY: Duration = Duration::from_secs(10);

/// Subsequent sweeps fire on this interval.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// A sweep triggered by exceeding `sizeLimit` evicts down to this
/// fraction of the limit.
pub const SWEEP_TARGET_RATIO: f64 = 0.7;

/// The filesystem block size assumed for allocated-size accounting
/// (`totalAllocatedSize`, and the size sweep's own bookkeeping). A
/// file's allocated size is its apparent size rounded up to the next
/// multiple of this.
pub const BLOCK_SIZE: u64 = 4096;

/// Bounds for the in-process LRU tier. A limit of `0` disables that
/// dimension.
#[derive(Clone, Copy, Debug)]
pub struct MemoryOptions {
    pub count_limit: usize,
    pub cost_limit: u64,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            count_limit: 0,
            cost_limit: 0,
        }
    }
}

impl MemoryOptions {
    pub fn with_count_limit(mut self, count_limit: usize) -> Self {
        self.count_limit = count_limit;
        self
    }

    pub fn with_cost_limit(mut self, cost_limit: u64) -> Self {
        self.cost_limit = cost_limit;
        self
    }
}

/// Where the disk tier's backing directory lives.
#[derive(Clone, Debug)]
pub enum CachePath {
    /// `<platform-caches-dir>/<name>`.
    Default(String),
    /// Used verbatim.
    Custom(PathBuf),
}

/// A pure, deterministic `Key -> Option<filename>` projection.
pub type FilenameFn<K> = Arc<dyn Fn(&K) -> Option<String> + Send + Sync>;

/// Disk tier configuration.
#[derive(Clone)]
pub struct DiskOptions<K> {
    pub size_limit: u64,
    pub expiration_timeout: Option<Duration>,
    pub path: CachePath,
    pub filename: FilenameFn<K>,
}

impl<K> DiskOptions<K>
where
    K: Display,
{
    /// Uses the default SHA-1-of-`Display` filename function.
    pub fn new(path: CachePath) -> Self {
        Self {
            size_limit: DEFAULT_SIZE_LIMIT,
            expiration_timeout: None,
            path,
            filename: Arc::new(|key: &K| crate::filename::sha1_filename(&key.to_string())),
        }
    }
}

impl<K> DiskOptions<K> {
    /// Supplies a custom filename function, bypassing the `Display`
    /// bound `new` requires.
    pub fn with_filename_fn(path: CachePath, filename: FilenameFn<K>) -> Self {
        Self {
            size_limit: DEFAULT_SIZE_LIMIT,
            expiration_timeout: None,
            path,
            filename,
        }
    }

    pub fn with_size_limit(mut self, size_limit: u64) -> Self {
        self.size_limit = size_limit;
        self
    }

    pub fn with_expiration_timeout(mut self, timeout: Duration) -> Self {
        self.expiration_timeout = Some(timeout);
        self
    }
}

/// Top-level configuration for a [`Cache`](crate::cache::Cache).
#[derive(Clone)]
pub struct CacheOptions<K> {
    pub memory: MemoryOptions,
    pub disk: DiskOptions<K>,
}

impl<K> CacheOptions<K> {
    pub fn new(memory: MemoryOptions, disk: DiskOptions<K>) -> Self {
        Self { memory, disk }
    }
}
