//! A two-tier cache: a bounded in-process LRU sits in front of a
//! directory of files on disk, with writes staged and flushed in the
//! background so callers never block on filesystem I/O.
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use tandem_cache::{Cache, CacheOptions, CachePath, DiskOptions, MemoryOptions, SystemClock};
//!
//! # async fn run() -> tandem_cache::Result<()> {
//! let options = CacheOptions::new(
//!     MemoryOptions::default().with_count_limit(1_000),
//!     DiskOptions::<String>::new(CachePath::Default("my-app-cache".to_string())),
//! );
//! let cache: Cache<String, Bytes> = Cache::new(options, Arc::new(SystemClock));
//! cache.prepare()?;
//!
//! cache.store("greeting".to_string(), Bytes::from_static(b"hello")).await;
//! assert_eq!(cache.value(&"greeting".to_string()).await?, Some(Bytes::from_static(b"hello")));
//! # Ok(())
//! # }
//! ```

mod cache;
mod clock;
mod disk;
mod error;
mod filename;
mod lru;
mod memory;
mod options;
mod queue;
mod staging;
mod value;

pub use cache::Cache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, Result};
pub use filename::sha1_filename;
pub use options::{
    CacheOptions, CachePath, DiskOptions, FilenameFn, MemoryOptions, BLOCK_SIZE,
    DEFAULT_SIZE_LIMIT, FIRST_SWEEP_DELAY, FLUSH_DELAY, SWEEP_INTERVAL, SWEEP_TARGET_RATIO,
};
pub use value::{CacheValue, CodecError, Json};
