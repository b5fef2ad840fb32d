//! Lock-step multicast.
//!
//! Fans a single base sequence out to any number of consumers ("runners")
//! that advance in cycles: every cycle pulls exactly one element from the
//! base and delivers it to every runner before the next pull begins. The
//! slowest live runner therefore rate-limits the base — the number of
//! elements pulled equals the *maximum* any runner consumed, not the sum.
//!
//! ## How It Works
//!
//! ```text
//!             cycle n                      cycle n+1
//!   ┌──────────────────────────┐ ┌─────────────────────────
//!   │ A: FETCH ──▶ base.next() │ │ A: HOLD (B not done yet)
//!   │ B: WAIT  ◀── result ─────┤ │ B: YIELD cached result
//!   └──────────────────────────┘ └─────────────────────────
//! ```
//!
//! The first runner to ask in a cycle drives the base (FETCH); concurrent
//! askers park (WAIT) and are resumed with the same result; late askers take
//! the cached result (YIELD); runners that already consumed the cycle park in
//! the next one (HOLD) until everyone catches up.
//!
//! ## History
//!
//! The coordinator keeps the most recent `history` successful elements and
//! replays them as a prefix to every new runner. With `history = 2` a runner
//! subscribing after `"a", "b"` were delivered starts with `["a", "b"]` and
//! then joins the live cycles.
//!
//! ## Lifecycle
//!
//! The base iterator is created lazily on first demand. With
//! [`DisposalPolicy::WhenTerminatedOrVacant`] it is dropped (and history
//! cleared) as soon as the last runner deregisters; a later runner starts a
//! fresh base iterator. Dropping the last [`Broadcast`] handle aborts the
//! coordinator: terminal latches and every parked runner resolves with clean
//! end. A base failure is delivered exactly once to every current runner,
//! after which their cursors return clean end.

mod iterator;
mod state;

use std::sync::Arc;

use crate::policy::DisposalPolicy;
use crate::seq::Sequence;
use crate::state::StateCell;

pub use iterator::BroadcastIter;

use state::{BroadcastState, Establish};

pub(crate) struct BroadcastCore<S>
where
    S: Sequence + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    pub(crate) state: StateCell<BroadcastState<S>>,
}

/// Multicasting handle over a base sequence; see the [module docs](self).
///
/// Cloning yields another handle onto the same coordinator. Every
/// [`make_iter`](Sequence::make_iter) registers a new runner; when the last
/// handle is dropped the coordinator aborts.
pub struct Broadcast<S>
where
    S: Sequence + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    core: Arc<BroadcastCore<S>>,
    owner: Arc<AbortOnDrop<S>>,
}

impl<S> Broadcast<S>
where
    S: Sequence + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    /// Wraps `source`, replaying up to `history` recent elements to new
    /// runners and disposing of the upstream per `disposal`.
    pub fn new(source: S, history: usize, disposal: DisposalPolicy) -> Self {
        let core = Arc::new(BroadcastCore {
            state: StateCell::new(BroadcastState::new(source, history, disposal)),
        });
        let owner = Arc::new(AbortOnDrop { core: core.clone() });
        Self { core, owner }
    }
}

impl<S> Clone for Broadcast<S>
where
    S: Sequence + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            owner: self.owner.clone(),
        }
    }
}

impl<S> Sequence for Broadcast<S>
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    type Item = S::Item;
    type Iter = BroadcastIter<S>;

    fn make_iter(&self) -> Self::Iter {
        match self.core.state.with(|bcast| bcast.establish()) {
            Establish::Active { id, prefix } => {
                BroadcastIter::active(self.core.clone(), id, prefix)
            }
            Establish::Terminal => BroadcastIter::terminal(self.core.clone()),
        }
    }
}

struct AbortOnDrop<S>
where
    S: Sequence + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    core: Arc<BroadcastCore<S>>,
}

impl<S> Drop for AbortOnDrop<S>
where
    S: Sequence + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    fn drop(&mut self) {
        let (waiters, holders) = self.core.state.with(|bcast| bcast.abort());
        for (resumer, outcome) in waiters {
            resumer.resume(outcome);
        }
        for holder in holders {
            holder.resume(());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::channel::Channel;
    use crate::seq::testing::{Counted, drain};
    use crate::seq::{self, SeqIter, Step, fault};

    #[derive(Debug, thiserror::Error)]
    #[error("base failed")]
    struct BaseFailed;

    /// A single runner sees the base verbatim.
    #[tokio::test]
    async fn single_runner_passthrough() {
        let bcast = Broadcast::new(
            seq::items(vec![1, 2, 3]),
            0,
            DisposalPolicy::WhenTerminated,
        );
        let mut iter = bcast.make_iter();
        let (elements, terminal) = drain(&mut iter).await;
        assert_eq!(elements, vec![1, 2, 3]);
        assert!(matches!(terminal, Step::End));
        assert!(matches!(iter.next().await, Step::End));
    }

    /// Two concurrent runners both observe the full sequence, and the base
    /// is pulled once per element, not once per runner per element.
    #[tokio::test]
    async fn lock_step_shares_pulls() {
        let (counted, pulls) = Counted::new(seq::items(vec![1, 2, 3, 4]));
        let bcast = Broadcast::new(counted, 0, DisposalPolicy::WhenTerminated);

        let mut a = bcast.make_iter();
        let mut b = bcast.make_iter();
        let ta = tokio::spawn(async move { drain(&mut a).await.0 });
        let tb = tokio::spawn(async move { drain(&mut b).await.0 });
        assert_eq!(ta.await.unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(tb.await.unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(pulls.load(Ordering::SeqCst), 4);
    }

    /// Scenario: runner B subscribes after "a" and "b" were delivered with
    /// history 2; both runners end with the same output.
    #[tokio::test]
    async fn late_runner_replays_history() {
        let chan = Channel::new();
        let bcast = Broadcast::new(chan.clone(), 2, DisposalPolicy::WhenTerminated);

        let mut a = bcast.make_iter();
        let feeder = chan.clone();
        tokio::spawn(async move {
            let _ = feeder.send("a").await;
            let _ = feeder.send("b").await;
        });
        let mut a_out = vec![
            a.next().await.item().unwrap(),
            a.next().await.item().unwrap(),
        ];

        // B joins once "a" and "b" sit in history
        let mut b = bcast.make_iter();
        let feeder = chan.clone();
        tokio::spawn(async move {
            let _ = feeder.send("c").await;
            feeder.finish();
        });
        let ta = tokio::spawn(async move {
            let mut out = Vec::new();
            loop {
                match a.next().await {
                    Step::Item(value) => out.push(value),
                    Step::End | Step::Failed(_) => break,
                }
            }
            out
        });
        let (b_out, b_term) = drain(&mut b).await;
        a_out.extend(ta.await.unwrap());

        assert_eq!(a_out, vec!["a", "b", "c"]);
        assert_eq!(b_out, vec!["a", "b", "c"]);
        assert!(matches!(b_term, Step::End));
    }

    /// A base failure reaches every runner exactly once, then clean end.
    #[tokio::test]
    async fn failure_reaches_every_runner_once() {
        let bcast = Broadcast::new(
            seq::from_steps(vec![Step::Item(1), Step::Failed(fault(BaseFailed))]),
            0,
            DisposalPolicy::WhenTerminated,
        );
        let mut a = bcast.make_iter();
        let mut b = bcast.make_iter();
        let ta = tokio::spawn(async move {
            let (items, terminal) = drain(&mut a).await;
            let end_after = a.next().await;
            (items, terminal, end_after)
        });
        let (b_items, b_terminal) = drain(&mut b).await;
        let (a_items, a_terminal, a_after) = ta.await.unwrap();

        assert_eq!(a_items, vec![1]);
        assert_eq!(b_items, vec![1]);
        assert!(a_terminal.is_failure());
        assert!(b_terminal.is_failure());
        assert!(matches!(a_after, Step::End));
    }

    /// A runner subscribing after terminal gets an immediately-ended cursor.
    #[tokio::test]
    async fn post_terminal_subscription_is_terminal() {
        let bcast = Broadcast::new(seq::items(vec![1]), 4, DisposalPolicy::WhenTerminated);
        let mut first = bcast.make_iter();
        let _ = drain(&mut first).await;
        let mut late = bcast.make_iter();
        assert!(matches!(late.next().await, Step::End));
    }

    /// Dropping the slowest runner finalizes its cycle so others proceed.
    #[tokio::test]
    async fn dropping_slow_runner_unblocks_the_rest() {
        let (counted, pulls) = Counted::new(seq::items(vec![1, 2, 3, 4, 5]));
        let bcast = Broadcast::new(counted, 0, DisposalPolicy::WhenTerminated);

        let mut fast = bcast.make_iter();
        let mut slow = bcast.make_iter();

        let fast_task = tokio::spawn(async move {
            let mut out = Vec::new();
            for _ in 0..3 {
                out.push(fast.next().await.item().unwrap());
            }
            out
        });
        // consume one element, then leave
        assert_eq!(slow.next().await.item(), Some(1));
        drop(slow);

        assert_eq!(fast_task.await.unwrap(), vec![1, 2, 3]);
        // lock-step: pulls track the furthest runner, not the pair
        assert_eq!(pulls.load(Ordering::SeqCst), 3);
    }

    /// Vacancy with `WhenTerminatedOrVacant` restarts the base for the next
    /// subscriber; with `WhenTerminated` the base keeps its position.
    #[tokio::test]
    async fn disposal_policies_differ_on_vacancy() {
        // restart from scratch
        let bcast = Broadcast::new(
            seq::items(vec![1, 2, 3]),
            0,
            DisposalPolicy::WhenTerminatedOrVacant,
        );
        let mut first = bcast.make_iter();
        assert_eq!(first.next().await.item(), Some(1));
        drop(first);
        let mut second = bcast.make_iter();
        assert_eq!(second.next().await.item(), Some(1));

        // keep the position
        let bcast = Broadcast::new(seq::items(vec![1, 2, 3]), 0, DisposalPolicy::WhenTerminated);
        let mut first = bcast.make_iter();
        assert_eq!(first.next().await.item(), Some(1));
        drop(first);
        let mut second = bcast.make_iter();
        assert_eq!(second.next().await.item(), Some(2));
    }

    /// Dropping the last handle resolves parked runners with clean end.
    #[tokio::test]
    async fn dropping_the_handle_aborts() {
        let chan = Channel::<u8>::new();
        let bcast = Broadcast::new(chan.clone(), 0, DisposalPolicy::WhenTerminated);
        let mut iter = bcast.make_iter();
        let parked = tokio::spawn(async move { iter.next().await });
        tokio::task::yield_now().await;
        drop(bcast);
        assert!(matches!(parked.await.unwrap(), Step::End));
    }

    /// History is bounded: a late runner replays at most `history` elements.
    #[tokio::test]
    async fn history_is_bounded() {
        let chan = Channel::new();
        let bcast = Broadcast::new(chan.clone(), 2, DisposalPolicy::WhenTerminated);
        let mut early = bcast.make_iter();
        let feeder = chan.clone();
        tokio::spawn(async move {
            for value in [1, 2, 3, 4] {
                let _ = feeder.send(value).await;
            }
        });
        for expected in [1, 2, 3, 4] {
            assert_eq!(early.next().await.item(), Some(expected));
        }
        let mut late = bcast.make_iter();
        let feeder = chan.clone();
        tokio::spawn(async move {
            let _ = feeder.send(5).await;
            feeder.finish();
        });
        let early_task = tokio::spawn(async move { drain(&mut early).await.0 });
        let (late_items, _) = drain(&mut late).await;
        assert_eq!(late_items, vec![3, 4, 5]);
        assert_eq!(early_task.await.unwrap(), vec![5]);
    }
}
