//! The staged write-back engine. Owns the staging log, the flush
//! debounce, the background sweeper, the per-key in-flight ("Running
//! Tasks") table, and the backing directory.

use crate::clock::Clock;
use crate::error::{CacheError, Result};
use crate::options::{
    CachePath, DiskOptions, BLOCK_SIZE, FIRST_SWEEP_DELAY, FLUSH_DELAY, SWEEP_INTERVAL,
    SWEEP_TARGET_RATIO,
};
use crate::queue::OperationQueue;
use crate::staging::{Change, ChangeOp, Resolution, StagingLog};
use bytes::Bytes;
use futures::future::{BoxFuture, Shared};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use parking_lot::Mutex;
use std::hash::Hash;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tokio::sync::oneshot;

/// Rounds an apparent file size up to the nearest `BLOCK_SIZE`, modeling
/// the disk space a file actually occupies rather than its byte length.
fn allocated_size(apparent: u64) -> u64 {
    apparent.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// An in-flight per-key filesystem operation. Readers await `done`
/// (a level-triggered, memoizing future) rather than a notification, so
/// a reader that arrives after the task has already finished still
/// observes completion instead of hanging.
#[derive(Clone)]
struct RunningTask {
    done: Shared<BoxFuture<'static, ()>>,
}

struct Inner<K> {
    options: DiskOptions<K>,
    clock: Arc<dyn Clock>,
    queue: Arc<OperationQueue>,
    directory: Mutex<Option<PathBuf>>,
    staging: Mutex<StagingLog<K>>,
    running: scc::HashMap<K, RunningTask>,
    is_flush_needed: AtomicBool,
    flushing_task: Mutex<Option<Shared<BoxFuture<'static, ()>>>>,
}

impl<K> Inner<K>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    fn url_for(&self, key: &K) -> Option<PathBuf> {
        let dir = self.directory.lock().clone()?;
        let name = (self.options.filename)(key)?;
        Some(dir.join(name))
    }

    /// Idempotently arms the flush chain: if a flush is already pending
    /// this is a no-op.
    fn set_needs_flush(self: &Arc<Self>) {
        if self.is_flush_needed.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = self.clone();
        let previous = inner.flushing_task.lock().clone();
        // armed now, synchronously, so a clock already mid-advance can't
        // race past this debounce before it's registered
        let debounce = inner.clock.delay(FLUSH_DELAY);
        let chained: BoxFuture<'static, ()> = Box::pin(async move {
            debounce.await;
            if let Some(previous) = previous {
                previous.await;
            }
            inner.is_flush_needed.store(false, Ordering::SeqCst);
            tracing::debug!("flush starting");
            inner.run_flush().await;
            tracing::debug!("flush finished");
        });

        let shared = chained.shared();
        *self.flushing_task.lock() = Some(shared.clone());
        tokio::spawn(shared);
    }

    async fn run_flush(self: &Arc<Self>) {
        let initial_stages = self.staging.lock().stage_count();
        let mut attempts = 0;

        while attempts <= initial_stages {
            let oldest = self.staging.lock().oldest_stage();
            let Some((stage_id, remove_all, changes)) = oldest else {
                break;
            };

            self.flush_stage(stage_id, remove_all, changes).await;
            attempts += 1;

            if self.staging.lock().is_empty() {
                break;
            }
        }
    }

    async fn flush_stage(self: &Arc<Self>, stage_id: u64, remove_all: bool, changes: Vec<Change<K>>) {
        if remove_all {
            let Some(dir) = self.directory.lock().clone() else {
                return;
            };
            let keys: Vec<K> = changes.iter().map(|c| c.key.clone()).collect();

            let job: BoxFuture<'static, io::Result<()>> = Box::pin(async move {
                match tokio::fs::remove_dir_all(&dir).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
                tokio::fs::create_dir_all(&dir).await
            });

            let ok = self.run_keyed_task(keys, job).await;
            if ok {
                let acked: Vec<(K, u64)> = changes.into_iter().map(|c| (c.key, c.id)).collect();
                self.staging.lock().flushed(stage_id, &acked);
            }
            return;
        }

        let mut pending = FuturesUnordered::new();
        let mut successes = Vec::new();

        for change in changes {
            let Change { id, key, op } = change;

            let Some(path) = self.url_for(&key) else {
                // no filename for this key: nothing to write, report it
                // flushed immediately.
                successes.push((key, id));
                continue;
            };

            let inner = self.clone();
            let key_for_result = key.clone();

            let job: BoxFuture<'static, io::Result<()>> = match op {
                ChangeOp::Add(bytes) => Box::pin(async move {
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&path, bytes).await
                }),
                ChangeOp::Remove => Box::pin(async move {
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => Ok(()),
                        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                        Err(e) => Err(e),
                    }
                }),
            };

            pending.push(async move {
                let ok = inner.run_keyed_task(vec![key.clone()], job).await;
                (key_for_result, id, ok)
            });
        }

        while let Some((key, id, ok)) = pending.next().await {
            if ok {
                successes.push((key, id));
            }
        }

        self.staging.lock().flushed(stage_id, &successes);
    }

    /// Registers `keys` in the running-tasks table under one shared
    /// completion signal, runs `job`, then clears the registration.
    /// Panics if any key is already registered — the staging log's
    /// conflict detection is supposed to make that unreachable.
    async fn run_keyed_task<F>(self: &Arc<Self>, keys: Vec<K>, job: F) -> bool
    where
        F: std::future::Future<Output = io::Result<()>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<bool>();
        let inner = self.clone();
        let cleanup_keys = keys.clone();

        let fut: BoxFuture<'static, ()> = Box::pin(async move {
            let ok = job.await.is_ok();
            for key in &cleanup_keys {
                inner.running.remove(key);
            }
            let _ = tx.send(ok);
        });

        let shared = fut.shared();
        for key in &keys {
            if self
                .running
                .insert(key.clone(), RunningTask { done: shared.clone() })
                .is_err()
            {
                panic!("running task already present for key; per-key single-writer invariant violated");
            }
        }

        tokio::spawn(shared);
        rx.await.unwrap_or(false)
    }

    async fn await_running(&self, key: &K) {
        let done = self.running.read(key, |_, task| task.done.clone());
        if let Some(done) = done {
            done.await;
        }
    }

    async fn sweep_once(self: &Arc<Self>) {
        let Some(dir) = self.directory.lock().clone() else {
            return;
        };

        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(r) => r,
            Err(_) => return,
        };

        let now = self.clock.wall_now();
        let mut entries: Vec<(PathBuf, SystemTime, u64)> = Vec::new();

        loop {
            let next = read_dir.next_entry().await;
            match next {
                Ok(Some(entry)) => {
                    let metadata = match entry.metadata().await {
                        Ok(m) => m,
                        Err(e) => {
                            tracing::warn!(error = %e, path = ?entry.path(), "sweeper could not stat entry");
                            continue;
                        }
                    };
                    let accessed = metadata.accessed().unwrap_or(now);
                    entries.push((entry.path(), accessed, allocated_size(metadata.len())));
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "sweeper aborted listing directory");
                    return;
                }
            }
        }

        if let Some(timeout) = self.options.expiration_timeout {
            let mut survivors = Vec::with_capacity(entries.len());
            for entry in entries {
                let expired = now
                    .duration_since(entry.1)
                    .map(|age| age >= timeout)
                    .unwrap_or(false);
                if expired {
                    if let Err(e) = tokio::fs::remove_file(&entry.0).await {
                        tracing::warn!(error = %e, path = ?entry.0, "sweeper could not remove expired entry");
                        survivors.push(entry);
                    }
                } else {
                    survivors.push(entry);
                }
            }
            entries = survivors;
        }

        let mut total: u64 = entries.iter().map(|(_, _, size)| *size).sum();
        if total > self.options.size_limit {
            // oldest access-date last, so popping from the back evicts
            // the least-recently-accessed entry first.
            entries.sort_by(|a, b| b.1.cmp(&a.1));
            let target = (self.options.size_limit as f64 * SWEEP_TARGET_RATIO) as u64;

            while total > target {
                let Some((path, _, size)) = entries.pop() else {
                    break;
                };
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => total = total.saturating_sub(size),
                    Err(e) => {
                        tracing::warn!(error = %e, path = ?path, "sweeper could not remove entry over size limit");
                    }
                }
            }
        }
    }
}

/// The persistent tier. Cheaply cloneable: clones share the same
/// backing state.
#[derive(Clone)]
pub struct DiskTier<K> {
    inner: Arc<Inner<K>>,
}

impl<K> DiskTier<K>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    pub fn new(options: DiskOptions<K>, clock: Arc<dyn Clock>, queue: Arc<OperationQueue>) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                clock,
                queue,
                directory: Mutex::new(None),
                staging: Mutex::new(StagingLog::new()),
                running: scc::HashMap::new(),
                is_flush_needed: AtomicBool::new(false),
                flushing_task: Mutex::new(None),
            }),
        }
    }

    /// Resolves the backing directory and arms the sweeper. Does not
    /// create the directory yet — that happens lazily on first write.
    pub fn prepare(&self) -> Result<()> {
        let resolved = match &self.inner.options.path {
            CachePath::Custom(path) => path.clone(),
            CachePath::Default(name) => {
                let base = dirs::cache_dir().ok_or(CacheError::PathUnavailable)?;
                base.join(name)
            }
        };

        tracing::info!(directory = ?resolved, "disk tier directory resolved");
        *self.inner.directory.lock() = Some(resolved);
        self.arm_sweeper();
        Ok(())
    }

    fn arm_sweeper(&self) {
        let weak: Weak<Inner<K>> = Arc::downgrade(&self.inner);
        let clock = self.inner.clock.clone();
        // armed now, before the task is spawned, for the same reason as
        // the flush debounce above
        let first_sweep = clock.delay(FIRST_SWEEP_DELAY);
        tokio::spawn(async move {
            first_sweep.await;
            loop {
                let Some(inner) = weak.upgrade() else {
                    tracing::debug!("sweeper exiting, cache dropped");
                    return;
                };
                tracing::debug!("sweep starting");
                inner.sweep_once().await;
                tracing::debug!("sweep finished");
                let next_delay = inner.clock.delay(SWEEP_INTERVAL);
                drop(inner);
                next_delay.await;
            }
        });
    }

    /// Resolution order: queue tail, then staging, then any in-flight
    /// task for this key, then the file itself.
    pub async fn get(&self, key: &K, now: SystemTime) -> Result<Option<Bytes>> {
        self.inner.queue.wait_for_tail().await;

        match self.inner.staging.lock().resolve(key) {
            Resolution::Tombstone => return Ok(None),
            Resolution::Change(change) => {
                return Ok(match change.op {
                    ChangeOp::Add(bytes) => Some(bytes),
                    ChangeOp::Remove => None,
                });
            }
            Resolution::NotFound => {}
        }

        self.inner.await_running(key).await;

        let Some(path) = self.inner.url_for(key) else {
            return Ok(None);
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                self.touch_access_date(path, now);
                Ok(Some(Bytes::from(bytes)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort access-date touch so the sweeper's approximate-LRU
    /// ordering reflects reads, not just writes. Fire and forget:
    /// failures are logged and otherwise swallowed.
    fn touch_access_date(&self, path: PathBuf, now: SystemTime) {
        tokio::task::spawn_blocking(move || match std::fs::OpenOptions::new().write(true).open(&path) {
            Ok(file) => {
                let times = std::fs::FileTimes::new().set_accessed(now);
                if let Err(e) = file.set_times(times) {
                    tracing::debug!(error = %e, path = ?path, "could not touch access date");
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, path = ?path, "could not open file to touch access date");
            }
        });
    }

    /// Appends an Add change and arms the flush timer. Must be invoked
    /// from within the composite cache's single queued operation — this
    /// type has no operation-queue of its own to avoid double-chaining
    /// writes that the composite cache already linearizes (see
    /// `cache.rs`).
    pub fn store(&self, key: K, bytes: Bytes) {
        self.inner.staging.lock().add(key, bytes);
        self.inner.set_needs_flush();
    }

    pub fn remove(&self, key: K) {
        self.inner.staging.lock().remove(key);
        self.inner.set_needs_flush();
    }

    pub fn clear(&self) {
        self.inner.staging.lock().remove_all();
        self.inner.set_needs_flush();
    }

    pub fn url(&self, key: &K) -> Option<PathBuf> {
        self.inner.url_for(key)
    }

    /// Awaits the most recently armed flush chain, if any. Tests use
    /// this after advancing a [`ManualClock`](crate::clock::ManualClock)
    /// to observe the flush's filesystem effects deterministically.
    pub async fn wait_idle(&self) {
        let flushing = self.inner.flushing_task.lock().clone();
        if let Some(flushing) = flushing {
            flushing.await;
        }
    }

    pub fn staging_stage_count(&self) -> usize {
        self.inner.staging.lock().stage_count()
    }

    pub async fn total_count(&self) -> Result<u64> {
        let dir = self.directory()?;
        let mut count = 0u64;
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(r) => r,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(_entry) = read_dir.next_entry().await? {
            count += 1;
        }
        Ok(count)
    }

    pub async fn total_size(&self) -> Result<u64> {
        let dir = self.directory()?;
        let mut total = 0u64;
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(r) => r,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            total += entry.metadata().await?.len();
        }
        Ok(total)
    }

    /// Sum of each entry's apparent size rounded up to `BLOCK_SIZE`,
    /// not its raw byte length — this is the metric the size sweep
    /// itself triggers on.
    pub async fn total_allocated_size(&self) -> Result<u64> {
        let dir = self.directory()?;
        let mut total = 0u64;
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(r) => r,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            total += allocated_size(entry.metadata().await?.len());
        }
        Ok(total)
    }

    fn directory(&self) -> Result<PathBuf> {
        self.inner.directory.lock().clone().ok_or(CacheError::PathUnavailable)
    }
}
