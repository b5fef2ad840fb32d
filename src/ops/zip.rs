//! Pairwise combination.

use async_trait::async_trait;

use crate::seq::{SeqIter, Sequence, Step};

/// Sequence returned by [`SequenceExt::zip`](super::SequenceExt::zip).
pub struct Zip<A, B> {
    left: A,
    right: B,
}

impl<A, B> Zip<A, B> {
    pub(super) fn new(left: A, right: B) -> Self {
        Self { left, right }
    }
}

impl<A, B> Sequence for Zip<A, B>
where
    A: Sequence,
    B: Sequence,
{
    type Item = (A::Item, B::Item);
    type Iter = ZipIter<A::Iter, B::Iter>;

    fn make_iter(&self) -> Self::Iter {
        ZipIter {
            left: self.left.make_iter(),
            right: self.right.make_iter(),
            done: false,
        }
    }
}

/// Cursor over a [`Zip`].
pub struct ZipIter<A, B> {
    left: A,
    right: B,
    done: bool,
}

#[async_trait]
impl<A, B> SeqIter for ZipIter<A, B>
where
    A: SeqIter,
    B: SeqIter,
{
    type Item = (A::Item, B::Item);

    async fn next(&mut self) -> Step<(A::Item, B::Item)> {
        if self.done {
            return Step::End;
        }
        let left = match self.left.next().await {
            Step::Item(item) => item,
            Step::End => {
                self.done = true;
                return Step::End;
            }
            Step::Failed(fault) => {
                self.done = true;
                return Step::Failed(fault);
            }
        };
        match self.right.next().await {
            Step::Item(right) => Step::Item((left, right)),
            Step::End => {
                self.done = true;
                Step::End
            }
            Step::Failed(fault) => {
                self.done = true;
                Step::Failed(fault)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ops::SequenceExt;
    use crate::seq::SeqIter;
    use crate::seq::testing::drain;
    use crate::seq::{self, Sequence, Step};

    #[tokio::test]
    async fn pairs_up_to_the_shorter() {
        let mut iter = seq::items(vec![1, 2, 3])
            .zip(seq::items(vec!["a", "b"]))
            .make_iter();
        let (pairs, terminal) = drain(&mut iter).await;
        assert_eq!(pairs, vec![(1, "a"), (2, "b")]);
        assert!(matches!(terminal, Step::End));
        assert!(matches!(iter.next().await, Step::End));
    }
}
