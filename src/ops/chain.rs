//! Sequential concatenation.

use async_trait::async_trait;

use crate::seq::{SeqIter, Sequence, Step};

/// Sequence returned by [`SequenceExt::chain`](super::SequenceExt::chain).
pub struct Chain<A, B> {
    first: A,
    second: B,
}

impl<A, B> Chain<A, B> {
    pub(super) fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A, B> Sequence for Chain<A, B>
where
    A: Sequence,
    B: Sequence<Item = A::Item>,
{
    type Item = A::Item;
    type Iter = ChainIter<A::Iter, B::Iter>;

    fn make_iter(&self) -> Self::Iter {
        ChainIter {
            first: self.first.make_iter(),
            second: self.second.make_iter(),
            on_second: false,
            done: false,
        }
    }
}

/// Cursor over a [`Chain`].
pub struct ChainIter<A, B> {
    first: A,
    second: B,
    on_second: bool,
    done: bool,
}

#[async_trait]
impl<A, B> SeqIter for ChainIter<A, B>
where
    A: SeqIter,
    B: SeqIter<Item = A::Item>,
{
    type Item = A::Item;

    async fn next(&mut self) -> Step<A::Item> {
        if self.done {
            return Step::End;
        }
        if !self.on_second {
            match self.first.next().await {
                Step::Item(item) => return Step::Item(item),
                Step::End => self.on_second = true,
                Step::Failed(fault) => {
                    // a failing first half pre-empts the second
                    self.done = true;
                    return Step::Failed(fault);
                }
            }
        }
        let step = self.second.next().await;
        if step.is_terminal() {
            self.done = true;
        }
        step
    }
}

#[cfg(test)]
mod tests {
    use crate::ops::SequenceExt;
    use crate::seq::SeqIter;
    use crate::seq::testing::drain;
    use crate::seq::{self, Sequence, Step, fault};

    #[derive(Debug, thiserror::Error)]
    #[error("first half failed")]
    struct FirstFailed;

    #[tokio::test]
    async fn concatenates_in_order() {
        let mut iter = seq::items(vec![1, 2])
            .chain(seq::items(vec![3, 4]))
            .make_iter();
        let (elements, terminal) = drain(&mut iter).await;
        assert_eq!(elements, vec![1, 2, 3, 4]);
        assert!(matches!(terminal, Step::End));
    }

    /// A failure in the first half latches; the second half never runs.
    #[tokio::test]
    async fn first_failure_preempts_the_second() {
        let chained = seq::from_steps(vec![Step::Item(1), Step::Failed(fault(FirstFailed))])
            .chain(seq::items(vec![9]));
        let mut iter = chained.make_iter();
        assert_eq!(iter.next().await.item(), Some(1));
        assert!(iter.next().await.is_failure());
        assert!(matches!(iter.next().await, Step::End));
    }
}
