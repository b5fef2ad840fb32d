//! Sliding window of two.

use async_trait::async_trait;

use crate::seq::{SeqIter, Sequence, Step};

/// Sequence returned by
/// [`SequenceExt::adjacent_pairs`](super::SequenceExt::adjacent_pairs).
pub struct AdjacentPairs<S> {
    source: S,
}

impl<S> AdjacentPairs<S> {
    pub(super) fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S> Sequence for AdjacentPairs<S>
where
    S: Sequence,
    S::Item: Clone,
{
    type Item = (S::Item, S::Item);
    type Iter = AdjacentPairsIter<S::Iter>;

    fn make_iter(&self) -> Self::Iter {
        AdjacentPairsIter {
            base: self.source.make_iter(),
            previous: None,
        }
    }
}

/// Cursor over an [`AdjacentPairs`].
pub struct AdjacentPairsIter<I>
where
    I: SeqIter,
{
    base: I,
    previous: Option<I::Item>,
}

#[async_trait]
impl<I> SeqIter for AdjacentPairsIter<I>
where
    I: SeqIter,
    I::Item: Clone,
{
    type Item = (I::Item, I::Item);

    async fn next(&mut self) -> Step<(I::Item, I::Item)> {
        loop {
            match self.base.next().await {
                Step::Item(item) => {
                    if let Some(previous) = self.previous.replace(item.clone()) {
                        return Step::Item((previous, item));
                    }
                }
                Step::End => return Step::End,
                Step::Failed(fault) => return Step::Failed(fault),
            }
        }
    }
}
