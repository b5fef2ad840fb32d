//! Buffered multicast.
//!
//! Fans a single base sequence out to any number of consumers ("sides")
//! through a shared element buffer. Unlike the lock-step
//! [`broadcast`](crate::broadcast), sides advance at their own pace within
//! the bounds of a [`BufferPolicy`]:
//!
//! ```text
//!                    ┌───────────────────────┐
//!   base ──▶ pull ──▶│  (4,e) (5,f) (6,g)    │  shared buffer
//!            task    └───────────────────────┘
//!                       ▲         ▲       ▲
//!                     side A    side B  side C     (positions 4, 5, 6)
//! ```
//!
//! The buffer is trimmed whenever every live side has advanced past its
//! head. A single background pull task drives the base, spawned lazily on
//! first demand; it alternates between waiting for buffer space (bounded
//! policy), waiting for at least one side with outstanding demand, pulling
//! one element and publishing it.
//!
//! ## Policies
//!
//! - [`BufferPolicy::Bounded`]: the pull task suspends while the buffer is
//!   full — the slowest side back-pressures the base.
//! - [`BufferPolicy::BufferingOldest`]: lagging sides keep the oldest
//!   elements; new ones past the cap are dropped for them.
//! - [`BufferPolicy::BufferingNewest`]: lagging sides skip ahead; the oldest
//!   buffered element is dropped when the cap is hit.
//! - [`BufferPolicy::Unbounded`]: never back-pressures, never drops.
//!
//! A base failure replaces the next element for every side that has not
//! reached it, exactly once per side; afterwards their cursors return clean
//! end. Dropping the last [`Share`] handle aborts the coordinator and
//! resolves every parked side with clean end.

mod iterator;
mod state;

use std::sync::Arc;

use crate::policy::BufferPolicy;
use crate::seq::Sequence;
use crate::state::StateCell;

pub use iterator::ShareIter;

use state::{ShareState, SideId};

pub(crate) struct ShareCore<S>
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    pub(crate) state: StateCell<ShareState<S::Item>>,
    pub(crate) source: S,
}

/// Buffered multicasting handle over a base sequence; see the
/// [module docs](self).
///
/// Cloning yields another handle onto the same coordinator. Every
/// [`make_iter`](Sequence::make_iter) registers a new side starting at the
/// buffer head; when the last handle is dropped the coordinator aborts.
pub struct Share<S>
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    core: Arc<ShareCore<S>>,
    owner: Arc<AbortOnDrop<S>>,
}

impl<S> Share<S>
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    /// Wraps `source` with the given buffering policy.
    ///
    /// # Panics
    ///
    /// Panics if `policy` carries a zero bound.
    pub fn new(source: S, policy: BufferPolicy) -> Self {
        policy.assert_valid();
        let core = Arc::new(ShareCore {
            state: StateCell::new(ShareState::new(policy)),
            source,
        });
        let owner = Arc::new(AbortOnDrop { core: core.clone() });
        Self { core, owner }
    }
}

impl<S> Clone for Share<S>
where
    S: Sequence + Sync + 'static,
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

impl<S> Sequence for Share<S>
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    type Item = S::Item;
    type Iter = ShareIter<S>;

    fn make_iter(&self) -> Self::Iter {
        let id: SideId = self.core.state.with(|share| share.register());
        ShareIter::new(self.core.clone(), id)
    }
}

struct AbortOnDrop<S>
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    core: Arc<ShareCore<S>>,
}

impl<S> Drop for AbortOnDrop<S>
where
    S: Sequence + Sync + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    fn drop(&mut self) {
        let (deliveries, demand, space, handle) = self.core.state.with(|share| share.abort());
        for (resumer, step) in deliveries {
            resumer.resume(step);
        }
        if let Some(demand) = demand {
            demand.resume(());
        }
        if let Some(space) = space {
            space.resume(());
        }
        if let Some(handle) = handle {
            handle.abort();
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

    /// With an unbounded buffer a lagging side replays everything a fast
    /// side already consumed.
    #[tokio::test]
    async fn unbounded_replays_for_laggards() {
        let share = Share::new(seq::items(vec![1, 2, 3]), BufferPolicy::Unbounded);
        let mut fast = share.make_iter();
        let mut slow = share.make_iter();

        let (fast_items, fast_term) = drain(&mut fast).await;
        assert_eq!(fast_items, vec![1, 2, 3]);
        assert!(matches!(fast_term, Step::End));

        let (slow_items, slow_term) = drain(&mut slow).await;
        assert_eq!(slow_items, vec![1, 2, 3]);
        assert!(matches!(slow_term, Step::End));
    }

    /// Scenario: bounded(1) with two consumers — the base is pulled for
    /// element n only after both consumed element n-1, and nothing is lost.
    #[tokio::test]
    async fn bounded_back_pressures_to_the_slowest() {
        let (counted, pulls) = Counted::new(seq::items(vec![1, 2, 3, 4]));
        let share = Share::new(counted, BufferPolicy::Bounded(1));
        let mut a = share.make_iter();
        let mut b = share.make_iter();

        let ta = tokio::spawn(async move { drain(&mut a).await });
        let tb = tokio::spawn(async move { drain(&mut b).await });
        let (a_items, _) = ta.await.unwrap();
        let (b_items, _) = tb.await.unwrap();

        assert_eq!(a_items, vec![1, 2, 3, 4]);
        assert_eq!(b_items, vec![1, 2, 3, 4]);
        assert_eq!(pulls.load(Ordering::SeqCst), 4);
    }

    /// bufferingNewest(1): a lagging side skips to the most recent element.
    #[tokio::test]
    async fn buffering_newest_skips_laggards_ahead() {
        let share = Share::new(seq::items(vec![1, 2, 3, 4, 5]), BufferPolicy::BufferingNewest(1));
        let mut fast = share.make_iter();
        let mut slow = share.make_iter();

        let (fast_items, _) = drain(&mut fast).await;
        assert_eq!(fast_items, vec![1, 2, 3, 4, 5]);

        let (slow_items, slow_term) = drain(&mut slow).await;
        assert_eq!(slow_items, vec![5]);
        assert!(matches!(slow_term, Step::End));
    }

    /// bufferingOldest(1): a lagging side keeps the oldest element; newer
    /// ones past the cap never reach it.
    #[tokio::test]
    async fn buffering_oldest_keeps_the_head() {
        let share = Share::new(seq::items(vec![1, 2, 3, 4, 5]), BufferPolicy::BufferingOldest(1));
        let mut fast = share.make_iter();
        let mut slow = share.make_iter();

        let (fast_items, _) = drain(&mut fast).await;
        assert_eq!(fast_items, vec![1, 2, 3, 4, 5]);

        let (slow_items, _) = drain(&mut slow).await;
        assert_eq!(slow_items, vec![1]);
    }

    /// A base failure reaches every side exactly once, then clean end.
    #[tokio::test]
    async fn failure_reaches_every_side_once() {
        let share = Share::new(
            seq::from_steps(vec![Step::Item(1), Step::Failed(fault(BaseFailed))]),
            BufferPolicy::Unbounded,
        );
        let mut a = share.make_iter();
        let mut b = share.make_iter();

        let (a_items, a_term) = drain(&mut a).await;
        assert_eq!(a_items, vec![1]);
        assert!(a_term.is_failure());
        assert!(matches!(a.next().await, Step::End));

        let (b_items, b_term) = drain(&mut b).await;
        assert_eq!(b_items, vec![1]);
        assert!(b_term.is_failure());
    }

    /// A side registered after the upstream terminated still drains what is
    /// buffered for it.
    #[tokio::test]
    async fn late_side_drains_the_backlog() {
        let share = Share::new(seq::items(vec![1, 2]), BufferPolicy::Unbounded);
        let mut early = share.make_iter();
        let laggard = share.make_iter(); // keeps the buffer from trimming
        let _ = drain(&mut early).await;

        let mut late = share.make_iter();
        let (late_items, late_term) = drain(&mut late).await;
        assert_eq!(late_items, vec![1, 2]);
        assert!(matches!(late_term, Step::End));
        drop(laggard);
    }

    /// Dropping a parked side leaves the others undisturbed.
    #[tokio::test]
    async fn dropping_a_parked_side_is_isolated() {
        let chan = Channel::new();
        let share = Share::new(chan.clone(), BufferPolicy::Unbounded);
        let mut doomed = share.make_iter();
        let mut survivor = share.make_iter();

        let parked = tokio::spawn(async move { doomed.next().await });
        tokio::task::yield_now().await;
        parked.abort();
        let _ = parked.await;

        let feeder = chan.clone();
        tokio::spawn(async move {
            let _ = feeder.send(9).await;
            feeder.finish();
        });
        let (items, term) = drain(&mut survivor).await;
        assert_eq!(items, vec![9]);
        assert!(matches!(term, Step::End));
    }

    /// Dropping the last handle resolves parked sides with clean end.
    #[tokio::test]
    async fn dropping_the_handle_aborts() {
        let chan = Channel::<u8>::new();
        let share = Share::new(chan.clone(), BufferPolicy::Unbounded);
        let mut iter = share.make_iter();
        let parked = tokio::spawn(async move { iter.next().await });
        tokio::task::yield_now().await;
        drop(share);
        assert!(matches!(parked.await.unwrap(), Step::End));
    }
}
