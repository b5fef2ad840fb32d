//! Per-element selection.

use async_trait::async_trait;

use crate::seq::{SeqIter, Sequence, Step};

/// Sequence returned by [`SequenceExt::filter`](super::SequenceExt::filter).
pub struct Filter<S, F> {
    source: S,
    predicate: F,
}

impl<S, F> Filter<S, F> {
    pub(super) fn new(source: S, predicate: F) -> Self {
        Self { source, predicate }
    }
}

impl<S, F> Sequence for Filter<S, F>
where
    S: Sequence,
    F: FnMut(&S::Item) -> bool + Clone + Send,
{
    type Item = S::Item;
    type Iter = FilterIter<S::Iter, F>;

    fn make_iter(&self) -> Self::Iter {
        FilterIter {
            base: self.source.make_iter(),
            predicate: self.predicate.clone(),
        }
    }
}

/// Cursor over a [`Filter`].
pub struct FilterIter<I, F> {
    base: I,
    predicate: F,
}

#[async_trait]
impl<I, F> SeqIter for FilterIter<I, F>
where
    I: SeqIter,
    F: FnMut(&I::Item) -> bool + Send,
{
    type Item = I::Item;

    async fn next(&mut self) -> Step<I::Item> {
        loop {
            match self.base.next().await {
                Step::Item(item) => {
                    if (self.predicate)(&item) {
                        return Step::Item(item);
                    }
                }
                terminal => return terminal,
            }
        }
    }
}
