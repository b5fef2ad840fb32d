//! Side cursor and pull task for the buffered share.

use std::sync::Arc;

use async_trait::async_trait;

use crate::seq::{SeqIter, Sequence, Step};

use super::ShareCore;
use super::state::{Gate, NextAction, PullTask, SideId};

/// Cursor of one share side.
///
/// Starts at the head of whatever is still buffered and advances at its own
/// pace within the buffering policy. Dropping the cursor deregisters the
/// side, letting the buffer trim past its position.
pub struct ShareIter<S>
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    core: Arc<ShareCore<S>>,
    id: SideId,
    done: bool,
}

impl<S> ShareIter<S>
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    pub(super) fn new(core: Arc<ShareCore<S>>, id: SideId) -> Self {
        Self {
            core,
            id,
            done: false,
        }
    }
}

#[async_trait]
impl<S> SeqIter for ShareIter<S>
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    type Item = S::Item;

    async fn next(&mut self) -> Step<S::Item> {
        if self.done {
            return Step::End;
        }
        ensure_task(&self.core);
        let action = self.core.state.with(|share| share.on_next(self.id));
        let step = match action {
            NextAction::Ready(step, space) => {
                if let Some(space) = space {
                    space.resume(());
                }
                step
            }
            NextAction::Suspend(suspended, demand) => {
                if let Some(demand) = demand {
                    demand.resume(());
                }
                let guard = UnparkGuard {
                    core: &self.core,
                    id: self.id,
                };
                let step = suspended.wait().await.unwrap_or(Step::End);
                guard.disarm();
                step
            }
        };
        if step.is_terminal() {
            self.done = true;
        }
        step
    }
}

impl<S> Drop for ShareIter<S>
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    fn drop(&mut self) {
        let id = self.id;
        let space = self.core.state.with(|share| share.unregister(id));
        if let Some(space) = space {
            space.resume(());
        }
    }
}

/// Clears a parked continuation if the side's `next` future is dropped
/// mid-wait. The side's position is untouched; the element it was promised
/// stays buffered for its next call.
struct UnparkGuard<'a, S>
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    core: &'a Arc<ShareCore<S>>,
    id: SideId,
}

impl<S> UnparkGuard<'_, S>
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl<S> Drop for UnparkGuard<'_, S>
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    fn drop(&mut self) {
        let id = self.id;
        self.core.state.with(|share| share.clear_parked(id));
    }
}

/// Spawns the pull task on first demand: `Pending → Starting → Running`.
pub(super) fn ensure_task<S>(core: &Arc<ShareCore<S>>)
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    let claimed = core.state.with(|share| {
        if matches!(share.task, PullTask::Pending) {
            share.task = PullTask::Starting;
            true
        } else {
            false
        }
    });
    if !claimed {
        return;
    }
    let iter = core.source.make_iter();
    let handle = tokio::spawn(drive::<S>(iter, core.clone()));
    core.state.with(|share| {
        if matches!(share.task, PullTask::Starting) {
            share.task = PullTask::Running(handle);
        } else {
            // aborted while starting
            handle.abort();
        }
    });
}

/// The single background pull task: wait for buffer space (bounded policy),
/// wait for demand, pull one element, publish it.
async fn drive<S>(mut iter: S::Iter, core: Arc<ShareCore<S>>)
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    'pull: loop {
        loop {
            match core.state.with(|share| share.space_gate()) {
                Gate::Go => break,
                Gate::Exit => return,
                Gate::Park(suspended) => {
                    if suspended.wait().await.is_none() {
                        return;
                    }
                }
            }
        }
        loop {
            match core.state.with(|share| share.demand_gate()) {
                Gate::Go => break,
                Gate::Exit => return,
                Gate::Park(suspended) => {
                    if suspended.wait().await.is_none() {
                        return;
                    }
                    // space may have filled while parked here
                    continue 'pull;
                }
            }
        }
        let step = iter.next().await;
        let (deliveries, exit) = core.state.with(|share| share.emit(step));
        for (resumer, step) in deliveries {
            resumer.resume(step);
        }
        if exit {
            return;
        }
    }
}
