//! Shared upstream iterator.
//!
//! Wraps a non-thread-safe base iterator and exposes a concurrency-safe
//! `next`. A single background task drives the base; requesters rendezvous
//! with it through two alternating slots:
//!
//! ```text
//!               ┌───────────────┐  demand   ┌─────────────────┐
//!  next() ────▶ │ pendingRequest │ ────────▶ │ background task │──▶ base.next()
//!               └───────────────┘           └─────────────────┘
//!                      ▲                           │
//!                      │        ┌───────────────┐  │
//!                      └─────── │pendingResponse│ ◀┘
//!                               └───────────────┘
//! ```
//!
//! If a requester gives up mid-wait (its future is dropped), the pull still
//! completes in the background task and the result parks in the response
//! slot for the next requester. Nothing the base produces is lost.
//!
//! At most one requester may be suspended at a time; the coordinators uphold
//! this by construction (only the FETCH runner drives the base). A second
//! concurrent request is a programming error and panics.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::trace;

use crate::resume::{Resumer, Suspension, suspension};
use crate::seq::{SeqIter, Step};
use crate::state::StateCell;

struct RelayState<T> {
    /// Suspended requester, if any. At most one.
    requester: Option<Resumer<Step<T>>>,
    /// Background task parked waiting for demand.
    parked: Option<Resumer<()>>,
    /// A pull result nobody has claimed yet.
    response: Option<Step<T>>,
    /// A request is outstanding (survives the requester's future).
    demand: bool,
    /// Base reported a terminal step, or `cancel` was called.
    terminal: bool,
    task: Option<JoinHandle<()>>,
}

/// Concurrency-safe adapter over a single-owner base iterator.
///
/// Cloning yields another handle onto the same base; pulls through any
/// handle are serialized by the internal rendezvous.
pub struct SharedIter<T> {
    state: Arc<StateCell<RelayState<T>>>,
}

impl<T> Clone for SharedIter<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

enum NextAction<T> {
    Ready(Step<T>),
    Suspend(Suspension<Step<T>>, Option<Resumer<()>>),
}

impl<T: Send + 'static> SharedIter<T> {
    /// Takes ownership of `base` and spawns the background task that drives
    /// it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<I>(base: I) -> Self
    where
        I: SeqIter<Item = T> + 'static,
    {
        let state = Arc::new(StateCell::new(RelayState {
            requester: None,
            parked: None,
            response: None,
            demand: false,
            terminal: false,
            task: None,
        }));
        let handle = tokio::spawn(drive(base, state.clone()));
        state.with(|relay| {
            if relay.terminal {
                // cancelled before the handle landed
                handle.abort();
            } else {
                relay.task = Some(handle);
            }
        });
        Self { state }
    }

    /// Resolves to the base's next step.
    ///
    /// Suspends until the background task delivers. After the base reports a
    /// terminal step (delivered to exactly one requester), every subsequent
    /// call returns [`Step::End`] immediately.
    ///
    /// # Panics
    ///
    /// Panics if another request is already suspended.
    pub async fn next(&self) -> Step<T> {
        let action = self.state.with(|relay| {
            if let Some(step) = relay.response.take() {
                return NextAction::Ready(step);
            }
            if relay.terminal {
                return NextAction::Ready(Step::End);
            }
            assert!(
                relay.requester.is_none(),
                "SharedIter: a second request was made while one is suspended"
            );
            relay.demand = true;
            let (resumer, suspended) = suspension();
            relay.requester = Some(resumer);
            NextAction::Suspend(suspended, relay.parked.take())
        });
        match action {
            NextAction::Ready(step) => step,
            NextAction::Suspend(suspended, wake) => {
                if let Some(parked) = wake {
                    parked.resume(());
                }
                let guard = AbandonGuard { state: &self.state };
                let step = suspended.wait().await.unwrap_or(Step::End);
                guard.disarm();
                step
            }
        }
    }

    /// Forces every suspended request and response to resolve with clean end
    /// and stops the background task. Idempotent.
    pub fn cancel(&self) {
        let (requester, parked, handle) = self.state.with(|relay| {
            if relay.terminal {
                return (None, None, None);
            }
            relay.terminal = true;
            relay.response = None;
            relay.demand = false;
            (relay.requester.take(), relay.parked.take(), relay.task.take())
        });
        if let Some(requester) = requester {
            requester.resume(Step::End);
        }
        if let Some(parked) = parked {
            parked.resume(());
        }
        if let Some(handle) = handle {
            handle.abort();
        }
        trace!("shared upstream cancelled");
    }
}

/// Clears the abandoned request slot if the requester's future is dropped
/// mid-wait. The in-flight pull parks its result in the response slot.
struct AbandonGuard<'a, T> {
    state: &'a StateCell<RelayState<T>>,
}

impl<T> AbandonGuard<'_, T> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl<T> Drop for AbandonGuard<'_, T> {
    fn drop(&mut self) {
        self.state.with(|relay| {
            relay.requester = None;
        });
    }
}

enum Gate {
    Go,
    Park(Suspension<()>),
    Exit,
}

async fn drive<I>(mut base: I, state: Arc<StateCell<RelayState<I::Item>>>)
where
    I: SeqIter,
    I::Item: 'static,
{
    loop {
        let gate = state.with(|relay| {
            if relay.terminal {
                Gate::Exit
            } else if relay.demand {
                Gate::Go
            } else {
                let (resumer, suspended) = suspension();
                relay.parked = Some(resumer);
                Gate::Park(suspended)
            }
        });
        match gate {
            Gate::Exit => break,
            Gate::Park(suspended) => {
                if suspended.wait().await.is_none() {
                    break;
                }
                continue;
            }
            Gate::Go => {}
        }

        let step = base.next().await;
        let terminal_step = step.is_terminal();
        let (delivery, exit) = state.with(move |relay| {
            relay.demand = false;
            if relay.terminal && !terminal_step {
                // cancelled while pulling: the element is discarded
                return (None, true);
            }
            if terminal_step {
                relay.terminal = true;
                relay.task = None;
            }
            match relay.requester.take() {
                Some(requester) => (Some((requester, step)), terminal_step),
                None => {
                    relay.response = Some(step);
                    (None, terminal_step)
                }
            }
        });
        if let Some((requester, step)) = delivery {
            if let Err(step) = requester.try_resume(step) {
                // requester vanished between unlock and resume; repark
                state.with(|relay| relay.response = Some(step));
            }
        }
        if exit {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq::{self, Sequence, fault, testing};

    #[derive(Debug, thiserror::Error)]
    #[error("base failed")]
    struct BaseFailed;

    #[tokio::test]
    async fn serializes_pulls_of_the_base() {
        let shared = SharedIter::new(seq::items(vec![1, 2, 3]).make_iter());
        assert_eq!(shared.next().await.item(), Some(1));
        assert_eq!(shared.next().await.item(), Some(2));
        assert_eq!(shared.next().await.item(), Some(3));
        assert!(matches!(shared.next().await, Step::End));
        assert!(matches!(shared.next().await, Step::End));
    }

    /// The failure goes to exactly one requester; later requests see end.
    #[tokio::test]
    async fn failure_then_end() {
        let shared = SharedIter::new(
            seq::from_steps(vec![Step::Item(1), Step::Failed(fault(BaseFailed))]).make_iter(),
        );
        assert_eq!(shared.next().await.item(), Some(1));
        assert!(shared.next().await.is_failure());
        assert!(matches!(shared.next().await, Step::End));
    }

    #[tokio::test]
    async fn cancel_resolves_suspended_requests_with_end() {
        // a channel-backed base that never yields keeps the request suspended
        let chan = crate::channel::Channel::<u8>::new();
        let shared = SharedIter::new(chan.make_iter());
        let puller = shared.clone();
        let handle = tokio::spawn(async move { puller.next().await });
        tokio::task::yield_now().await;
        shared.cancel();
        assert!(matches!(handle.await.unwrap(), Step::End));
        assert!(matches!(shared.next().await, Step::End));
        shared.cancel(); // idempotent
    }

    /// A requester that gives up mid-wait does not lose the element: the
    /// pull parks and the next requester receives it.
    #[tokio::test]
    async fn abandoned_request_parks_the_response() {
        let chan = crate::channel::Channel::<u8>::new();
        let shared = SharedIter::new(chan.make_iter());

        let puller = shared.clone();
        let abandoned = tokio::spawn(async move { puller.next().await });
        tokio::task::yield_now().await;
        abandoned.abort();
        let _ = abandoned.await;

        // the send satisfies the in-flight pull; the result must park
        chan.send(42).await.unwrap();
        assert_eq!(shared.next().await.item(), Some(42));
        drop(chan);
    }

    #[tokio::test]
    async fn pulls_every_element_through_clones() {
        let (counted, pulls) = testing::Counted::new(seq::items(vec![1, 2]));
        let shared = SharedIter::new(counted.make_iter());
        let other = shared.clone();
        assert_eq!(shared.next().await.item(), Some(1));
        assert_eq!(other.next().await.item(), Some(2));
        assert!(matches!(shared.next().await, Step::End));
        assert_eq!(pulls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
