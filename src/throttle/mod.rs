//! Time-gated reduction.
//!
//! Emits at most one element per `interval` of a [`Clock`], folding the
//! elements that arrive within an interval into a pending reduction:
//!
//! ```text
//!  upstream   1    2  3        4     5
//!  time      0ms  30  60     120   180
//!  interval  [────100ms────)[────100ms────)
//!  emitted    1        (≥100ms) 3      (≥200ms) 5      with latest = true
//! ```
//!
//! The first element of a fresh interval is emitted as soon as downstream
//! demands it; elements arriving before the interval elapses are folded; the
//! first demand after expiry takes the pending reduction and starts a new
//! interval. A clean upstream end drains the final reduction immediately; an
//! upstream failure pre-empts everything.
//!
//! Each cursor spawns its own pull task over a fresh base iterator on first
//! demand; dropping the cursor cancels the task.

mod state;

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::clock::{Clock, ClockInstant};
use crate::seq::{SeqIter, Sequence, Step};
use crate::state::StateCell;

use state::{Collect, Demand, Emission, Feed, Machine};

/// Time-gated reducing sequence; see the [module docs](self).
pub struct Throttle<S, C, R, F>
where
    C: Clock,
{
    source: S,
    clock: C,
    interval: C::Duration,
    reduce: F,
    _reduced: PhantomData<fn() -> R>,
}

impl<S, C, R, F> Throttle<S, C, R, F>
where
    S: Sequence + 'static,
    S::Iter: 'static,
    C: Clock + Clone,
    R: Send + 'static,
    F: FnMut(Option<R>, S::Item) -> R + Clone + Send + 'static,
{
    /// Folds the elements of each interval with `reduce` and emits the
    /// reduction at most once per `interval`.
    pub fn new(source: S, interval: C::Duration, clock: C, reduce: F) -> Self {
        Self {
            source,
            clock,
            interval,
            reduce,
            _reduced: PhantomData,
        }
    }
}

/// Keep only one element per interval: the latest (`latest = true`) or the
/// earliest (`latest = false`).
pub fn throttle_latest<S, C>(
    source: S,
    interval: C::Duration,
    clock: C,
    latest: bool,
) -> Throttle<S, C, S::Item, fn(Option<S::Item>, S::Item) -> S::Item>
where
    S: Sequence + 'static,
    S::Iter: 'static,
    C: Clock + Clone,
    S::Item: Send + 'static,
{
    fn keep_latest<T>(_prev: Option<T>, new: T) -> T {
        new
    }
    fn keep_earliest<T>(prev: Option<T>, new: T) -> T {
        prev.unwrap_or(new)
    }
    let reduce = if latest {
        keep_latest::<S::Item> as fn(Option<S::Item>, S::Item) -> S::Item
    } else {
        keep_earliest::<S::Item> as fn(Option<S::Item>, S::Item) -> S::Item
    };
    Throttle::new(source, interval, clock, reduce)
}

impl<S, C, R, F> Sequence for Throttle<S, C, R, F>
where
    S: Sequence + 'static,
    S::Iter: 'static,
    C: Clock + Clone,
    R: Send + 'static,
    F: FnMut(Option<R>, S::Item) -> R + Clone + Send + 'static,
{
    type Item = R;
    type Iter = ThrottleIter<S::Iter, C, R, F>;

    fn make_iter(&self) -> Self::Iter {
        ThrottleIter {
            base: Some(self.source.make_iter()),
            clock: self.clock.clone(),
            interval: self.interval,
            reduce: Some(self.reduce.clone()),
            machine: Arc::new(StateCell::new(Machine::new())),
            last_emit: None,
            done: false,
        }
    }
}

/// Cursor over a [`Throttle`]; owns the pull task it spawns on first demand.
pub struct ThrottleIter<I, C, R, F>
where
    C: Clock,
{
    /// Moved into the pull task on first demand.
    base: Option<I>,
    clock: C,
    interval: C::Duration,
    reduce: Option<F>,
    machine: Arc<StateCell<Machine<R>>>,
    last_emit: Option<C::Instant>,
    done: bool,
}

#[async_trait]
impl<I, C, R, F> SeqIter for ThrottleIter<I, C, R, F>
where
    I: SeqIter + 'static,
    C: Clock + Clone,
    R: Send + 'static,
    F: FnMut(Option<R>, I::Item) -> R + Send + 'static,
{
    type Item = R;

    async fn next(&mut self) -> Step<R> {
        if self.done {
            return Step::End;
        }
        self.ensure_task();
        let demand = self.machine.with(|machine| machine.signal_demand());
        match demand {
            Demand::Fail(fault) => {
                self.done = true;
                Step::Failed(fault)
            }
            Demand::End => {
                self.done = true;
                Step::End
            }
            Demand::Drain(reduction) => Step::Item(reduction),
            Demand::Proceed { wake_upstream } => {
                if let Some(upstream) = wake_upstream {
                    upstream.resume(());
                }
                let guard = RescindGuard {
                    machine: &self.machine,
                };
                if let Some(last_emit) = self.last_emit {
                    let deadline = last_emit.after(self.interval);
                    self.clock.sleep_until(deadline).await;
                }
                let collect = self.machine.with(|machine| machine.collect());
                let step = match collect {
                    Collect::Emit(reduction) => {
                        self.last_emit = Some(self.clock.now());
                        Step::Item(reduction)
                    }
                    Collect::Fail(fault) => {
                        self.done = true;
                        Step::Failed(fault)
                    }
                    Collect::End => {
                        self.done = true;
                        Step::End
                    }
                    Collect::Park(suspended) => match suspended.wait().await {
                        Some(Emission::Reduced(reduction)) => {
                            self.last_emit = Some(self.clock.now());
                            Step::Item(reduction)
                        }
                        Some(Emission::Failed(fault)) => {
                            self.done = true;
                            Step::Failed(fault)
                        }
                        Some(Emission::End) | None => {
                            self.done = true;
                            Step::End
                        }
                    },
                };
                guard.disarm();
                step
            }
        }
    }
}

impl<I, C, R, F> ThrottleIter<I, C, R, F>
where
    I: SeqIter + 'static,
    C: Clock,
    R: Send + 'static,
    F: FnMut(Option<R>, I::Item) -> R + Send + 'static,
{
    fn ensure_task(&mut self) {
        let claimed = self.machine.with(|machine| machine.needs_task());
        if !claimed {
            return;
        }
        let base = self.base.take().expect("pull task spawned once");
        let reduce = self.reduce.take().expect("pull task spawned once");
        let handle = tokio::spawn(pull(base, reduce, self.machine.clone()));
        self.machine.with(|machine| machine.task_started(handle));
    }
}

impl<I, C, R, F> Drop for ThrottleIter<I, C, R, F>
where
    C: Clock,
{
    fn drop(&mut self) {
        let handle = self.machine.with(|machine| machine.abort());
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Rescinds a demand whose `next` future was dropped mid-interval.
struct RescindGuard<'a, R> {
    machine: &'a Arc<StateCell<Machine<R>>>,
}

impl<R> RescindGuard<'_, R> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl<R> Drop for RescindGuard<'_, R> {
    fn drop(&mut self) {
        self.machine.with(|machine| machine.rescind_demand());
    }
}

/// The per-cursor pull task: pull, fold, park while demand is absent.
async fn pull<I, R, F>(mut base: I, mut reduce: F, machine: Arc<StateCell<Machine<R>>>)
where
    I: SeqIter,
    R: Send + 'static,
    F: FnMut(Option<R>, I::Item) -> R + Send,
{
    loop {
        let step = base.next().await;
        let (delivery, gate) = machine.with(|machine| machine.feed(step, &mut reduce));
        if let Some((downstream, emission)) = delivery {
            downstream.resume(emission);
        }
        match gate {
            Feed::Continue => {}
            Feed::Exit => return,
            Feed::Park(suspended) => {
                if suspended.wait().await.is_none() {
                    return;
                }
            }
        }
    }
}
