//! Concurrent interleaving.
//!
//! Built on the rendezvous [`Channel`]: one pump task per side pulls its
//! sequence and sends into a shared channel, so elements surface in arrival
//! order and each side's own order is preserved. The channel finishes when
//! both sides ended and fails as soon as either side fails.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::channel::{Channel, ChannelIter};
use crate::seq::{SeqIter, Sequence, Step};
use crate::state::StateCell;

/// Sequence returned by [`SequenceExt::merge`](super::SequenceExt::merge).
pub struct Merge<A, B> {
    left: A,
    right: B,
}

impl<A, B> Merge<A, B> {
    pub(super) fn new(left: A, right: B) -> Self {
        Self { left, right }
    }
}

impl<A, B> Sequence for Merge<A, B>
where
    A: Sequence + 'static,
    B: Sequence<Item = A::Item> + 'static,
    A::Item: Send + 'static,
    A::Iter: 'static,
    B::Iter: 'static,
{
    type Item = A::Item;
    type Iter = MergeIter<A::Iter, B::Iter>;

    fn make_iter(&self) -> Self::Iter {
        let chan = Channel::new();
        MergeIter {
            left: Some(self.left.make_iter()),
            right: Some(self.right.make_iter()),
            output: chan.make_iter(),
            chan,
            pumps: Vec::new(),
        }
    }
}

/// Cursor over a [`Merge`]; owns the two pump tasks it spawns on first
/// demand.
pub struct MergeIter<L, R>
where
    L: SeqIter,
    L::Item: 'static,
{
    left: Option<L>,
    right: Option<R>,
    chan: Channel<L::Item>,
    output: ChannelIter<L::Item>,
    pumps: Vec<JoinHandle<()>>,
}

#[async_trait]
impl<L, R> SeqIter for MergeIter<L, R>
where
    L: SeqIter + 'static,
    R: SeqIter<Item = L::Item> + 'static,
    L::Item: 'static,
{
    type Item = L::Item;

    async fn next(&mut self) -> Step<L::Item> {
        if let (Some(left), Some(right)) = (self.left.take(), self.right.take()) {
            let live = Arc::new(StateCell::new(2usize));
            self.pumps
                .push(tokio::spawn(pump(left, self.chan.clone(), live.clone())));
            self.pumps
                .push(tokio::spawn(pump(right, self.chan.clone(), live)));
        }
        self.output.next().await
    }
}

impl<L, R> Drop for MergeIter<L, R>
where
    L: SeqIter,
    L::Item: 'static,
{
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
        self.chan.finish();
    }
}

/// Forwards one side into the shared channel; the last side to end finishes
/// it.
async fn pump<I>(mut iter: I, chan: Channel<I::Item>, live: Arc<StateCell<usize>>)
where
    I: SeqIter,
    I::Item: 'static,
{
    loop {
        match iter.next().await {
            Step::Item(item) => {
                if chan.send(item).await.is_err() {
                    return;
                }
            }
            Step::End => break,
            Step::Failed(fault) => {
                chan.fail_with(fault);
                return;
            }
        }
    }
    let both_done = live.with(|count| {
        *count -= 1;
        *count == 0
    });
    if both_done {
        chan.finish();
    }
}
