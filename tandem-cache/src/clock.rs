//! The clock produces monotonically advancing instants and suspendable
//! delays. It is injected so the flush debounce and the sweeper can be
//! driven deterministically in tests instead of waiting on a real wall
//! clock.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::oneshot;

pub trait Clock: Send + Sync + 'static {
    /// A monotonic instant, used for scheduling (flush debounce, sweep
    /// interval).
    fn now(&self) -> Instant;

    /// Wall-clock time, used for the read-path access-date touch and
    /// the sweeper's expiration comparisons.
    fn wall_now(&self) -> SystemTime;

    /// Arms a `dur`-long delay and returns a future that resolves once
    /// it has elapsed. Arming happens synchronously, when this is
    /// called, not lazily on the returned future's first poll — a
    /// caller that needs the delay to be visible to a concurrently
    /// advancing clock before control returns to the executor (e.g. to
    /// `ManualClock::advance`) must rely on that, rather than
    /// constructing its own sleep future to await later.
    fn delay(&self, dur: Duration) -> BoxFuture<'static, ()>;
}

/// The production clock: real time, real sleeps.
#[derive(Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn delay(&self, dur: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(dur))
    }
}

struct Waiter {
    target: Instant,
    tx: oneshot::Sender<()>,
}

struct ManualState {
    now: Instant,
    wall: SystemTime,
    waiters: VecDeque<Waiter>,
}

/// A clock a test drives by hand: `now()`/`wall_now()` only move when
/// [`ManualClock::advance`] is called, and a delay resolves only once an
/// `advance` carries the clock past its target. Registration of that
/// target happens the instant [`Clock::delay`] is called, so an
/// `advance` that runs before the returned future is ever polled still
/// wakes it correctly.
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: Instant::now(),
                wall: SystemTime::now(),
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Moves the clock forward, waking any sleeper whose target has now
    /// passed.
    pub fn advance(&self, by: Duration) {
        let ready: Vec<oneshot::Sender<()>> = {
            let mut state = self.state.lock();
            state.now += by;
            state.wall += by;
            let now = state.now;

            let mut still_waiting = VecDeque::with_capacity(state.waiters.len());
            let mut ready = Vec::new();
            for waiter in state.waiters.drain(..) {
                if waiter.target <= now {
                    ready.push(waiter.tx);
                } else {
                    still_waiting.push_back(waiter);
                }
            }
            state.waiters = still_waiting;
            ready
        };

        for tx in ready {
            let _ = tx.send(());
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.state.lock().now
    }

    fn wall_now(&self) -> SystemTime {
        self.state.lock().wall
    }

    fn delay(&self, dur: Duration) -> BoxFuture<'static, ()> {
        if dur.is_zero() {
            return Box::pin(std::future::ready(()));
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            let target = state.now + dur;
            state.waiters.push_back(Waiter { target, tx });
        }
        Box::pin(async move {
            let _ = rx.await;
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn delay_resolves_only_after_advance_past_target() {
        let clock = Arc::new(ManualClock::new());
        let waiter_clock = clock.clone();
        // arming happens here, synchronously, before the spawned task
        // is ever polled
        let delay = waiter_clock.delay(Duration::from_secs(1));
        let waiter = tokio::spawn(async move {
            delay.await;
        });

        clock.advance(Duration::from_millis(500));
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        clock.advance(Duration::from_millis(500));
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn delay_registers_before_being_polled() {
        let clock = ManualClock::new();
        let delay = clock.delay(Duration::from_secs(1));
        // advance before the returned future is ever polled
        clock.advance(Duration::from_secs(1));
        delay.await;
    }

    #[tokio::test]
    async fn wall_now_advances_with_now() {
        let clock = ManualClock::new();
        let before = clock.wall_now();
        clock.advance(Duration::from_secs(5));
        let after = clock.wall_now();
        assert_eq!(after.duration_since(before).unwrap(), Duration::from_secs(5));
    }
}
