//! Separator insertion.

use async_trait::async_trait;

use crate::seq::{SeqIter, Sequence, Step};

/// Sequence returned by
/// [`SequenceExt::intersperse`](super::SequenceExt::intersperse).
pub struct Intersperse<S>
where
    S: Sequence,
{
    source: S,
    separator: S::Item,
}

impl<S> Intersperse<S>
where
    S: Sequence,
{
    pub(super) fn new(source: S, separator: S::Item) -> Self {
        Self { source, separator }
    }
}

impl<S> Sequence for Intersperse<S>
where
    S: Sequence,
    S::Item: Clone,
{
    type Item = S::Item;
    type Iter = IntersperseIter<S::Iter>;

    fn make_iter(&self) -> Self::Iter {
        IntersperseIter {
            base: self.source.make_iter(),
            separator: self.separator.clone(),
            started: false,
            held_back: None,
        }
    }
}

/// Cursor over an [`Intersperse`].
pub struct IntersperseIter<I>
where
    I: SeqIter,
{
    base: I,
    separator: I::Item,
    started: bool,
    /// Element whose separator was just emitted.
    held_back: Option<I::Item>,
}

#[async_trait]
impl<I> SeqIter for IntersperseIter<I>
where
    I: SeqIter,
    I::Item: Clone,
{
    type Item = I::Item;

    async fn next(&mut self) -> Step<I::Item> {
        if let Some(item) = self.held_back.take() {
            return Step::Item(item);
        }
        match self.base.next().await {
            Step::Item(item) => {
                if self.started {
                    self.held_back = Some(item);
                    Step::Item(self.separator.clone())
                } else {
                    self.started = true;
                    Step::Item(item)
                }
            }
            terminal => terminal,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ops::SequenceExt;
    use crate::seq::testing::drain;
    use crate::seq::{self, Sequence};

    #[tokio::test]
    async fn separates_consecutive_elements() {
        let mut iter = seq::items(vec!["a", "b", "c"]).intersperse("-").make_iter();
        let (elements, _) = drain(&mut iter).await;
        assert_eq!(elements, vec!["a", "-", "b", "-", "c"]);
    }

    /// No separator after the last element, none around a singleton.
    #[tokio::test]
    async fn singleton_stays_bare() {
        let mut iter = seq::items(vec![1]).intersperse(0).make_iter();
        let (elements, _) = drain(&mut iter).await;
        assert_eq!(elements, vec![1]);
    }
}
