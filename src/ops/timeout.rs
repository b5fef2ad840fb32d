//! Deadlines over sequences and arbitrary operations.
//!
//! Both surfaces are races against a [`Clock`] sleep: whichever side
//! completes first cancels the other.

use async_trait::async_trait;

use crate::clock::{Clock, ClockInstant};
use crate::error::{DeadlineError, TimedOut};
use crate::seq::{SeqIter, Sequence, Step, fault};

/// Sequence returned by [`SequenceExt::timeout`](super::SequenceExt::timeout).
///
/// Each `next` must produce within `interval` of being demanded; otherwise
/// the cursor fails with [`TimedOut`] and latches terminal.
pub struct Timeout<S, C>
where
    C: Clock,
{
    source: S,
    interval: C::Duration,
    clock: C,
}

impl<S, C> Timeout<S, C>
where
    C: Clock,
{
    pub(super) fn new(source: S, interval: C::Duration, clock: C) -> Self {
        Self {
            source,
            interval,
            clock,
        }
    }
}

impl<S, C> Sequence for Timeout<S, C>
where
    S: Sequence,
    C: Clock + Clone,
{
    type Item = S::Item;
    type Iter = TimeoutIter<S::Iter, C>;

    fn make_iter(&self) -> Self::Iter {
        TimeoutIter {
            base: self.source.make_iter(),
            interval: self.interval,
            clock: self.clock.clone(),
            done: false,
        }
    }
}

/// Cursor over a [`Timeout`].
pub struct TimeoutIter<I, C>
where
    C: Clock,
{
    base: I,
    interval: C::Duration,
    clock: C,
    done: bool,
}

#[async_trait]
impl<I, C> SeqIter for TimeoutIter<I, C>
where
    I: SeqIter,
    C: Clock + Clone,
{
    type Item = I::Item;

    async fn next(&mut self) -> Step<I::Item> {
        if self.done {
            return Step::End;
        }
        let deadline = self.clock.now().after(self.interval);
        let step = tokio::select! {
            step = self.base.next() => step,
            _ = self.clock.sleep_until(deadline) => Step::Failed(fault(TimedOut)),
        };
        if step.is_terminal() {
            self.done = true;
        }
        step
    }
}

/// Races `operation` against `deadline` on `clock`.
///
/// The error keeps the two losing flavors apart: the operation failing on
/// its own before the deadline, versus the deadline elapsing first (which
/// cancels the operation).
pub async fn with_deadline<C, F, T, E>(
    clock: &C,
    deadline: C::Instant,
    operation: F,
) -> Result<T, DeadlineError<E>>
where
    C: Clock,
    F: Future<Output = Result<T, E>>,
{
    tokio::select! {
        result = operation => result.map_err(DeadlineError::OperationFailed),
        _ = clock.sleep_until(deadline) => Err(DeadlineError::TimedOut),
    }
}
