//! Combinators over [`Sequence`]s.
//!
//! Importing [`SequenceExt`] hangs the whole operator family off any
//! sequence:
//!
//! ```
//! use flusso::ops::SequenceExt;
//! use flusso::seq::{self, SeqIter, Sequence};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let mut iter = seq::items(vec![1, 2, 3, 4])
//!     .filter(|x| x % 2 == 0)
//!     .map(|x| x * 10)
//!     .make_iter();
//! assert_eq!(iter.next().await.item(), Some(20));
//! assert_eq!(iter.next().await.item(), Some(40));
//! # });
//! ```
//!
//! The pipeline operators (`map`, `filter`, `chain`, `zip`, …) are plain
//! wrappers around their base iterator. The concurrent ones (`merge`,
//! `chunked_by`) pump through a rendezvous [`Channel`](crate::channel); the
//! coordinator entry points (`broadcast`, `share`, `throttle`) defer to their
//! modules.

mod adjacent;
mod chain;
mod chunked_by;
mod chunks;
mod filter;
mod intersperse;
mod map;
mod merge;
mod timeout;
mod zip;

pub use adjacent::{AdjacentPairs, AdjacentPairsIter};
pub use chain::{Chain, ChainIter};
pub use chunked_by::{ChunkedBy, ChunkedByIter};
pub use chunks::{Chunks, ChunksIter};
pub use filter::{Filter, FilterIter};
pub use intersperse::{Intersperse, IntersperseIter};
pub use map::{Map, MapIter};
pub use merge::{Merge, MergeIter};
pub use timeout::{Timeout, TimeoutIter, with_deadline};
pub use zip::{Zip, ZipIter};

use crate::broadcast::Broadcast;
use crate::clock::Clock;
use crate::policy::{BufferPolicy, DisposalPolicy};
use crate::seq::Sequence;
use crate::share::Share;
use crate::throttle::Throttle;

/// Combinator methods available on every [`Sequence`].
pub trait SequenceExt: Sequence + Sized {
    /// Transforms each element with `transform`.
    fn map<U, F>(self, transform: F) -> Map<Self, F>
    where
        F: FnMut(Self::Item) -> U + Clone + Send,
        U: Send,
    {
        Map::new(self, transform)
    }

    /// Keeps the elements `predicate` accepts.
    fn filter<F>(self, predicate: F) -> Filter<Self, F>
    where
        F: FnMut(&Self::Item) -> bool + Clone + Send,
    {
        Filter::new(self, predicate)
    }

    /// Exhausts `self`, then `after`.
    fn chain<B>(self, after: B) -> Chain<Self, B>
    where
        B: Sequence<Item = Self::Item>,
    {
        Chain::new(self, after)
    }

    /// Pairs elements of `self` and `other`; ends at the shorter.
    fn zip<B>(self, other: B) -> Zip<Self, B>
    where
        B: Sequence,
    {
        Zip::new(self, other)
    }

    /// Interleaves `self` and `other` in arrival order.
    fn merge<B>(self, other: B) -> Merge<Self, B>
    where
        Self: 'static,
        B: Sequence<Item = Self::Item> + 'static,
        Self::Item: 'static,
        Self::Iter: 'static,
        B::Iter: 'static,
    {
        Merge::new(self, other)
    }

    /// Sliding window of two: `[1,2,3]` → `[(1,2),(2,3)]`.
    fn adjacent_pairs(self) -> AdjacentPairs<Self>
    where
        Self::Item: Clone,
    {
        AdjacentPairs::new(self)
    }

    /// Inserts `separator` between consecutive elements.
    fn intersperse(self, separator: Self::Item) -> Intersperse<Self>
    where
        Self::Item: Clone,
    {
        Intersperse::new(self, separator)
    }

    /// Groups elements into `Vec`s of `count`; the trailing partial chunk is
    /// emitted on clean end.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    fn chunks(self, count: usize) -> Chunks<Self> {
        Chunks::new(self, count)
    }

    /// Seals a chunk every time `signal` fires.
    fn chunked_by<B>(self, signal: B) -> ChunkedBy<Self, B>
    where
        Self: 'static,
        B: Sequence + 'static,
        Self::Item: 'static,
        Self::Iter: 'static,
        B::Iter: 'static,
    {
        ChunkedBy::new(self, signal)
    }

    /// Fails with [`TimedOut`](crate::error::TimedOut) if an element takes
    /// longer than `interval` to arrive.
    fn timeout<C>(self, interval: C::Duration, clock: C) -> Timeout<Self, C>
    where
        C: Clock + Clone,
    {
        Timeout::new(self, interval, clock)
    }

    /// Emits at most one fold result per `interval`; see
    /// [`throttle`](crate::throttle).
    fn throttle<C, R, F>(self, interval: C::Duration, clock: C, reduce: F) -> Throttle<Self, C, R, F>
    where
        Self: 'static,
        Self::Iter: 'static,
        C: Clock + Clone,
        R: Send + 'static,
        F: FnMut(Option<R>, Self::Item) -> R + Clone + Send + 'static,
    {
        Throttle::new(self, interval, clock, reduce)
    }

    /// Keeps one element per `interval`: the latest or the earliest.
    fn throttle_latest<C>(
        self,
        interval: C::Duration,
        clock: C,
        latest: bool,
    ) -> Throttle<Self, C, Self::Item, fn(Option<Self::Item>, Self::Item) -> Self::Item>
    where
        Self: 'static,
        Self::Iter: 'static,
        C: Clock + Clone,
        Self::Item: 'static,
    {
        crate::throttle::throttle_latest(self, interval, clock, latest)
    }

    /// Lock-step multicast with history replay; see
    /// [`broadcast`](crate::broadcast).
    fn broadcast(self, history: usize, disposal: DisposalPolicy) -> Broadcast<Self>
    where
        Self: 'static,
        Self::Item: Clone + 'static,
        Self::Iter: 'static,
    {
        Broadcast::new(self, history, disposal)
    }

    /// Buffered multicast under `policy`; see [`share`](crate::share).
    fn share(self, policy: BufferPolicy) -> Share<Self>
    where
        Self: Sync + 'static,
        Self::Item: Clone + 'static,
        Self::Iter: 'static,
    {
        Share::new(self, policy)
    }
}

impl<S> SequenceExt for S where S: Sequence + Sized {}
