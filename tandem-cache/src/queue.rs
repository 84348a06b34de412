//! The per-instance operation queue: an ordered chain of side-effectful
//! async operations. Each `enqueue` atomically replaces the stored tail
//! with a task that awaits the previous tail (whether it succeeded or
//! failed) and then runs the new work; the queued work is spawned
//! immediately so it keeps running even if the caller drops the handle
//! `enqueue` returns.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use tokio::sync::oneshot;

type Tail = Shared<BoxFuture<'static, ()>>;

pub struct OperationQueue {
    tail: Mutex<Option<Tail>>,
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationQueue {
    pub fn new() -> Self {
        Self {
            tail: Mutex::new(None),
        }
    }

    /// Chains `work` after whatever is currently the tail, making the
    /// result the new tail, and returns a future that resolves to
    /// `work`'s output once it runs. `work` is spawned onto the runtime
    /// immediately, so it runs to completion regardless of whether the
    /// returned future is ever polled.
    pub fn enqueue<F, Fut, T>(&self, work: F) -> impl Future<Output = T> + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let previous = self.tail.lock().clone();
        let (result_tx, result_rx) = oneshot::channel::<T>();

        let chained: BoxFuture<'static, ()> = Box::pin(async move {
            if let Some(previous) = previous {
                previous.await;
            }
            let output = work().await;
            let _ = result_tx.send(output);
        });

        let shared = chained.shared();
        *self.tail.lock() = Some(shared.clone());
        tokio::spawn(shared);

        async move {
            result_rx
                .await
                .expect("operation queue task dropped its result sender")
        }
    }

    /// Awaits the current tail without adding a new link — this is how
    /// reads observe every write enqueued before them without
    /// serializing behind later writes.
    pub async fn wait_for_tail(&self) {
        let tail = self.tail.lock().clone();
        if let Some(tail) = tail {
            tail.await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn operations_complete_in_submission_order() {
        let queue = OperationQueue::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..20 {
            let order = order.clone();
            handles.push(queue.enqueue(move || async move {
                // later submissions sleep less, so without ordering
                // they'd tend to finish first
                tokio::time::sleep(Duration::from_millis((20 - i) % 3)).await;
                order.lock().push(i);
            }));
        }

        for handle in handles {
            handle.await;
        }

        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn dropped_handle_does_not_cancel_the_work() {
        let queue = OperationQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();

        drop(queue.enqueue(move || async move {
            ran2.fetch_add(1, Ordering::SeqCst);
        }));

        // give the spawned task a chance to run
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reads_observe_prior_writes_without_serializing_behind_later_ones() {
        let queue = OperationQueue::new();
        let state = Arc::new(parking_lot::Mutex::new(0));

        let state2 = state.clone();
        queue
            .enqueue(move || async move {
                *state2.lock() = 1;
            })
            .await;

        queue.wait_for_tail().await;
        assert_eq!(*state.lock(), 1);
    }
}
