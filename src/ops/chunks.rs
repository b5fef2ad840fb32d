//! Fixed-size chunking.

use async_trait::async_trait;

use crate::seq::{SeqIter, Sequence, Step};

/// Sequence returned by [`SequenceExt::chunks`](super::SequenceExt::chunks).
pub struct Chunks<S> {
    source: S,
    count: usize,
}

impl<S> Chunks<S> {
    /// # Panics
    ///
    /// Panics if `count` is zero; a zero-sized chunk cannot make progress.
    pub(super) fn new(source: S, count: usize) -> Self {
        assert!(count > 0, "chunk count must be positive");
        Self { source, count }
    }
}

impl<S> Sequence for Chunks<S>
where
    S: Sequence,
{
    type Item = Vec<S::Item>;
    type Iter = ChunksIter<S::Iter>;

    fn make_iter(&self) -> Self::Iter {
        ChunksIter {
            base: self.source.make_iter(),
            count: self.count,
            done: false,
        }
    }
}

/// Cursor over a [`Chunks`].
pub struct ChunksIter<I> {
    base: I,
    count: usize,
    done: bool,
}

#[async_trait]
impl<I> SeqIter for ChunksIter<I>
where
    I: SeqIter,
{
    type Item = Vec<I::Item>;

    async fn next(&mut self) -> Step<Vec<I::Item>> {
        if self.done {
            return Step::End;
        }
        let mut chunk = Vec::with_capacity(self.count);
        loop {
            match self.base.next().await {
                Step::Item(item) => {
                    chunk.push(item);
                    if chunk.len() == self.count {
                        return Step::Item(chunk);
                    }
                }
                Step::End => {
                    self.done = true;
                    return if chunk.is_empty() {
                        Step::End
                    } else {
                        // trailing partial chunk
                        Step::Item(chunk)
                    };
                }
                Step::Failed(fault) => {
                    // a partial chunk is discarded by a failure
                    self.done = true;
                    return Step::Failed(fault);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ops::SequenceExt;
    use crate::seq::SeqIter;
    use crate::seq::testing::drain;
    use crate::seq::{self, Sequence, Step, fault};

    #[derive(Debug, thiserror::Error)]
    #[error("base failed")]
    struct BaseFailed;

    #[tokio::test]
    async fn chunks_with_trailing_partial() {
        let mut iter = seq::items(vec![1, 2, 3, 4, 5]).chunks(2).make_iter();
        let (chunks, terminal) = drain(&mut iter).await;
        assert_eq!(chunks, vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert!(matches!(terminal, Step::End));
        assert!(matches!(iter.next().await, Step::End));
    }

    #[tokio::test]
    async fn failure_discards_the_partial_chunk() {
        let chunked = seq::from_steps(vec![
            Step::Item(1),
            Step::Item(2),
            Step::Item(3),
            Step::Failed(fault(BaseFailed)),
        ])
        .chunks(2);
        let mut iter = chunked.make_iter();
        assert_eq!(iter.next().await.item(), Some(vec![1, 2]));
        assert!(iter.next().await.is_failure());
        assert!(matches!(iter.next().await, Step::End));
    }

    #[test]
    #[should_panic(expected = "chunk count must be positive")]
    fn zero_count_is_rejected() {
        let _ = seq::items(vec![1]).chunks(0);
    }
}
