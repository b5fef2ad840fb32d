//! Per-element transformation.

use async_trait::async_trait;

use crate::seq::{SeqIter, Sequence, Step};

/// Sequence returned by [`SequenceExt::map`](super::SequenceExt::map).
pub struct Map<S, F> {
    source: S,
    transform: F,
}

impl<S, F> Map<S, F> {
    pub(super) fn new(source: S, transform: F) -> Self {
        Self { source, transform }
    }
}

impl<S, F, U> Sequence for Map<S, F>
where
    S: Sequence,
    F: FnMut(S::Item) -> U + Clone + Send,
    U: Send,
{
    type Item = U;
    type Iter = MapIter<S::Iter, F>;

    fn make_iter(&self) -> Self::Iter {
        MapIter {
            base: self.source.make_iter(),
            transform: self.transform.clone(),
        }
    }
}

/// Cursor over a [`Map`].
pub struct MapIter<I, F> {
    base: I,
    transform: F,
}

#[async_trait]
impl<I, F, U> SeqIter for MapIter<I, F>
where
    I: SeqIter,
    F: FnMut(I::Item) -> U + Send,
    U: Send,
{
    type Item = U;

    async fn next(&mut self) -> Step<U> {
        self.base.next().await.map(&mut self.transform)
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
    async fn transforms_each_element() {
        let mut iter = seq::items(vec![1, 2, 3]).map(|x| x * 10).make_iter();
        let (elements, terminal) = drain(&mut iter).await;
        assert_eq!(elements, vec![10, 20, 30]);
        assert!(matches!(terminal, Step::End));
    }

    #[tokio::test]
    async fn passes_failures_through() {
        let mapped = seq::from_steps(vec![Step::Item(1), Step::Failed(fault(BaseFailed))])
            .map(|x: u32| x + 1);
        let mut iter = mapped.make_iter();
        assert_eq!(iter.next().await.item(), Some(2));
        assert!(iter.next().await.is_failure());
    }
}
