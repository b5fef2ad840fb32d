//! Runner-side cursor for the lock-step broadcast.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;

use crate::seq::{SeqIter, Sequence, Step};

use super::BroadcastCore;
use super::state::{Role, RunnerId, WaitOutcome};

/// Cursor of one broadcast runner.
///
/// Yields the history prefix snapshotted at registration, then participates
/// in the lock-step cycles. Dropping the cursor deregisters the runner; if it
/// was the slowest one, the cycle finalizes and the others proceed.
pub struct BroadcastIter<S>
where
    S: Sequence + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    core: Arc<BroadcastCore<S>>,
    id: Option<RunnerId>,
    prefix: VecDeque<S::Item>,
    done: bool,
}

impl<S> BroadcastIter<S>
where
    S: Sequence + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    pub(super) fn active(
        core: Arc<BroadcastCore<S>>,
        id: RunnerId,
        prefix: VecDeque<S::Item>,
    ) -> Self {
        Self {
            core,
            id: Some(id),
            prefix,
            done: false,
        }
    }

    pub(super) fn terminal(core: Arc<BroadcastCore<S>>) -> Self {
        Self {
            core,
            id: None,
            prefix: VecDeque::new(),
            done: true,
        }
    }
}

#[async_trait]
impl<S> SeqIter for BroadcastIter<S>
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    type Item = S::Item;

    async fn next(&mut self) -> Step<S::Item> {
        if let Some(item) = self.prefix.pop_front() {
            return Step::Item(item);
        }
        if self.done {
            return Step::End;
        }
        let Some(id) = self.id else {
            return Step::End;
        };
        loop {
            let role = self.core.state.with(|bcast| bcast.start_run(id));
            match role {
                Role::Fetch(base) => {
                    let guard = FetchGuard { core: &self.core };
                    let fetched = base.next().await;
                    guard.disarm();
                    let (step, waiters, holders) = self
                        .core
                        .state
                        .with(|bcast| bcast.fetch_report(id, fetched));
                    for (resumer, outcome) in waiters {
                        resumer.resume(outcome);
                    }
                    for holder in holders {
                        holder.resume(());
                    }
                    if step.is_terminal() {
                        self.done = true;
                    }
                    return step;
                }
                Role::Wait(suspended) => {
                    let guard = ParkGuard {
                        core: &self.core,
                        id,
                        slot: ParkSlot::Waiting,
                    };
                    let outcome = suspended.wait().await;
                    guard.disarm();
                    match outcome {
                        None => {
                            self.done = true;
                            return Step::End;
                        }
                        Some(WaitOutcome::Rerun) => continue,
                        Some(WaitOutcome::Result(step)) => {
                            let holders = self.core.state.with(|bcast| bcast.complete(id));
                            for holder in holders {
                                holder.resume(());
                            }
                            if step.is_terminal() {
                                self.done = true;
                            }
                            return step;
                        }
                    }
                }
                Role::Hold(suspended) => {
                    let guard = ParkGuard {
                        core: &self.core,
                        id,
                        slot: ParkSlot::Holding,
                    };
                    let woken = suspended.wait().await;
                    guard.disarm();
                    if woken.is_none() {
                        self.done = true;
                        return Step::End;
                    }
                }
                Role::Yield(step, holders) => {
                    for holder in holders {
                        holder.resume(());
                    }
                    if step.is_terminal() {
                        self.done = true;
                    }
                    return step;
                }
            }
        }
    }
}

impl<S> Drop for BroadcastIter<S>
where
    S: Sequence + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let holders = self.core.state.with(|bcast| bcast.cancel(id));
            for holder in holders {
                holder.resume(());
            }
        }
    }
}

enum ParkSlot {
    Waiting,
    Holding,
}

/// Clears a parked continuation if the `next` future is dropped mid-wait.
/// The runner stays in its cycle and re-observes the result on its next call.
struct ParkGuard<'a, S>
where
    S: Sequence + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    core: &'a Arc<BroadcastCore<S>>,
    id: RunnerId,
    slot: ParkSlot,
}

impl<S> ParkGuard<'_, S>
where
    S: Sequence + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl<S> Drop for ParkGuard<'_, S>
where
    S: Sequence + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    fn drop(&mut self) {
        let id = self.id;
        match self.slot {
            ParkSlot::Waiting => self.core.state.with(|bcast| bcast.clear_waiting(id)),
            ParkSlot::Holding => self.core.state.with(|bcast| bcast.clear_holding(id)),
        }
    }
}

/// Rewinds an abandoned fetch so the cycle can elect a new FETCHer. The
/// in-flight pull parks inside the shared upstream adapter; nothing is lost.
struct FetchGuard<'a, S>
where
    S: Sequence + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    core: &'a Arc<BroadcastCore<S>>,
}

impl<S> FetchGuard<'_, S>
where
    S: Sequence + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl<S> Drop for FetchGuard<'_, S>
where
    S: Sequence + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    fn drop(&mut self) {
        let waiters = self.core.state.with(|bcast| bcast.abort_fetch());
        for (resumer, outcome) in waiters {
            resumer.resume(outcome);
        }
    }
}
