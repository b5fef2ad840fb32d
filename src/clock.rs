//! Logical time.
//!
//! The time-gated operators never read the wall clock directly; they are
//! generic over a [`Clock`], which supplies instants, duration arithmetic and
//! a suspending `sleep_until`. Two implementations ship with the crate:
//!
//! - [`TokioClock`] — the monotonic continuous clock of the tokio runtime.
//!   Under `tokio::time::pause` (`#[tokio::test(start_paused = true)]`) it
//!   auto-advances, which makes timed tests deterministic.
//! - [`TestClock`] — a discrete step clock driven manually with
//!   [`TestClock::advance`]; its minimum resolution is one step.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::resume::{Resumer, suspension};
use crate::state::StateCell;

/// A point in a clock's timeline.
pub trait ClockInstant: Copy + Ord + Send + Sync + 'static {
    /// The span type this instant advances by.
    type Duration: Copy + Send + Sync + 'static;

    /// The instant `duration` past `self`.
    fn after(&self, duration: Self::Duration) -> Self;
}

/// A source of logical time.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Span type of this clock.
    type Duration: Copy + Send + Sync + 'static;
    /// Instant type of this clock.
    type Instant: ClockInstant<Duration = Self::Duration>;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Suspends until `deadline` has been reached.
    ///
    /// Returns immediately if `deadline` is not in the future.
    async fn sleep_until(&self, deadline: Self::Instant);
}

// ---------- tokio-backed clock ----------

impl ClockInstant for tokio::time::Instant {
    type Duration = Duration;

    fn after(&self, duration: Duration) -> Self {
        *self + duration
    }
}

/// Monotonic clock backed by the tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    type Duration = Duration;
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    async fn sleep_until(&self, deadline: Self::Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

// ---------- manual step clock ----------

/// An instant on a [`TestClock`] timeline, counted in discrete steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TestInstant(pub u64);

impl ClockInstant for TestInstant {
    type Duration = u64;

    fn after(&self, steps: u64) -> Self {
        TestInstant(self.0.saturating_add(steps))
    }
}

#[derive(Default)]
struct TestClockState {
    now: u64,
    sleepers: Vec<(u64, Resumer<()>)>,
}

/// A discrete clock advanced explicitly from test code.
///
/// Cloning yields another handle onto the same timeline.
#[derive(Clone, Default)]
pub struct TestClock {
    state: Arc<StateCell<TestClockState>>,
}

impl TestClock {
    /// A clock whose timeline starts at step zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `steps`, resuming every sleeper whose
    /// deadline has been reached.
    pub fn advance(&self, steps: u64) {
        let due = self.state.with(|state| {
            state.now = state.now.saturating_add(steps);
            let now = state.now;
            let mut due = Vec::new();
            let mut pending = Vec::new();
            for (deadline, resumer) in state.sleepers.drain(..) {
                if deadline <= now {
                    due.push(resumer);
                } else {
                    pending.push((deadline, resumer));
                }
            }
            state.sleepers = pending;
            due
        });
        for resumer in due {
            resumer.resume(());
        }
    }
}

#[async_trait]
impl Clock for TestClock {
    type Duration = u64;
    type Instant = TestInstant;

    fn now(&self) -> TestInstant {
        TestInstant(self.state.with(|state| state.now))
    }

    async fn sleep_until(&self, deadline: TestInstant) {
        let pending = self.state.with(|state| {
            if deadline.0 <= state.now {
                return None;
            }
            let (resumer, suspended) = suspension();
            state.sleepers.push((deadline.0, resumer));
            Some(suspended)
        });
        if let Some(suspended) = pending {
            let _ = suspended.wait().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sleeping until a past instant must not suspend.
    #[tokio::test]
    async fn past_deadline_returns_immediately() {
        let clock = TestClock::new();
        clock.advance(10);
        clock.sleep_until(TestInstant(5)).await;
        assert_eq!(clock.now(), TestInstant(10));
    }

    #[tokio::test]
    async fn advance_wakes_due_sleepers() {
        let clock = TestClock::new();
        let sleeper = clock.clone();
        let handle = tokio::spawn(async move {
            sleeper.sleep_until(TestInstant(3)).await;
            sleeper.now()
        });
        // let the sleeper register before advancing
        tokio::task::yield_now().await;
        clock.advance(2);
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        clock.advance(1);
        assert_eq!(handle.await.unwrap(), TestInstant(3));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_advances_under_pause() {
        let clock = TokioClock;
        let start = clock.now();
        clock
            .sleep_until(start.after(Duration::from_millis(100)))
            .await;
        assert!(clock.now() - start >= Duration::from_millis(100));
    }

    #[test]
    fn instant_arithmetic() {
        assert_eq!(TestInstant(2).after(3), TestInstant(5));
        assert!(TestInstant(2) < TestInstant(3));
    }
}
