//! Asynchronous sequences and their single-use cursors.
//!
//! A [`Sequence`] is a lazy, finite-or-infinite source of typed elements with
//! a single terminal signal: a clean end, or a failure. Iteration happens
//! through a [`SeqIter`] obtained from [`Sequence::make_iter`]; each iterator
//! yields a strictly increasing prefix of the sequence's events and then
//! latches terminal.
//!
//! ## Events
//!
//! Every call to [`SeqIter::next`] resolves to exactly one [`Step`]:
//!
//! ```text
//! Item(a) → Item(b) → Item(c) → End
//!                               ↑ latched: every later call returns End
//! ```
//!
//! A failing sequence replaces `End` with `Failed(fault)`; the fault is
//! delivered once, after which the iterator returns `End` like any other
//! terminated cursor.
//!
//! ## Contract
//!
//! - Iterators are single-owner and not concurrency-safe: at most one `next`
//!   may be outstanding per iterator. The multi-consumer coordinators in this
//!   crate ([`broadcast`](crate::broadcast), [`share`](crate::share)) exist
//!   precisely to lift this restriction.
//! - `make_iter` may be called any number of times; each call produces an
//!   independent cursor over the sequence from its beginning.

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;

/// A failure raised by a sequence.
///
/// Reference-counted so that one upstream failure can be handed to every
/// consumer of a multi-consumer coordinator.
pub type Fault = Arc<dyn Error + Send + Sync + 'static>;

/// Wraps any error into a [`Fault`].
pub fn fault<E>(error: E) -> Fault
where
    E: Error + Send + Sync + 'static,
{
    Arc::new(error)
}

/// One iteration event: an element, a clean end, or a failure.
#[derive(Debug, Clone)]
pub enum Step<T> {
    /// The next element of the sequence.
    Item(T),
    /// The sequence ended cleanly. Terminal.
    End,
    /// The sequence raised. Terminal; delivered at most once per consumer.
    Failed(Fault),
}

impl<T> Step<T> {
    /// Returns the element, discarding terminal steps.
    pub fn item(self) -> Option<T> {
        match self {
            Step::Item(value) => Some(value),
            Step::End | Step::Failed(_) => None,
        }
    }

    /// True for [`Step::End`] and [`Step::Failed`].
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Step::Item(_))
    }

    /// True for [`Step::Failed`].
    pub fn is_failure(&self) -> bool {
        matches!(self, Step::Failed(_))
    }

    /// Maps the element type, preserving terminal steps.
    pub fn map<U, F>(self, f: F) -> Step<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Step::Item(value) => Step::Item(f(value)),
            Step::End => Step::End,
            Step::Failed(fault) => Step::Failed(fault),
        }
    }
}

/// A single-use, single-owner cursor over a sequence.
#[async_trait]
pub trait SeqIter: Send {
    /// Element type produced by this cursor.
    type Item: Send;

    /// Resolves to the next event of the sequence.
    ///
    /// Once a terminal step has been returned, every subsequent call must
    /// return [`Step::End`].
    async fn next(&mut self) -> Step<Self::Item>;
}

/// A lazy asynchronous sequence of elements.
pub trait Sequence: Send {
    /// Element type of the sequence.
    type Item: Send;
    /// Cursor type produced by [`Sequence::make_iter`].
    type Iter: SeqIter<Item = Self::Item>;

    /// Creates a fresh cursor positioned at the start of the sequence.
    fn make_iter(&self) -> Self::Iter;
}

/// A finite sequence scripted from a list of elements, ending cleanly.
///
/// ```
/// use flusso::seq::{self, SeqIter, Sequence, Step};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let mut iter = seq::items(vec![1, 2]).make_iter();
/// assert!(matches!(iter.next().await, Step::Item(1)));
/// assert!(matches!(iter.next().await, Step::Item(2)));
/// assert!(matches!(iter.next().await, Step::End));
/// # });
/// ```
pub fn items<T>(elements: Vec<T>) -> Scripted<T>
where
    T: Clone + Send + Sync + 'static,
{
    let mut steps: Vec<Step<T>> = elements.into_iter().map(Step::Item).collect();
    steps.push(Step::End);
    from_steps(steps)
}

/// A finite sequence scripted from explicit [`Step`]s.
///
/// Useful for driving failure paths: script a few items followed by a
/// `Step::Failed`. Steps after the first terminal step are never yielded.
pub fn from_steps<T>(steps: Vec<Step<T>>) -> Scripted<T>
where
    T: Clone + Send + Sync + 'static,
{
    Scripted {
        steps: Arc::new(steps),
    }
}

/// Sequence returned by [`items`] and [`from_steps`].
#[derive(Clone)]
pub struct Scripted<T> {
    steps: Arc<Vec<Step<T>>>,
}

impl<T> Sequence for Scripted<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Item = T;
    type Iter = ScriptedIter<T>;

    fn make_iter(&self) -> Self::Iter {
        ScriptedIter {
            steps: self.steps.clone(),
            cursor: 0,
            done: false,
        }
    }
}

/// Cursor over a [`Scripted`] sequence.
pub struct ScriptedIter<T> {
    steps: Arc<Vec<Step<T>>>,
    cursor: usize,
    done: bool,
}

#[async_trait]
impl<T> SeqIter for ScriptedIter<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Item = T;

    async fn next(&mut self) -> Step<T> {
        if self.done {
            return Step::End;
        }
        let step = match self.steps.get(self.cursor) {
            Some(step) => step.clone(),
            None => Step::End,
        };
        self.cursor += 1;
        if step.is_terminal() {
            self.done = true;
        }
        step
    }
}

/// Bridges a cursor into a [`futures::Stream`](futures::Stream) of
/// `Result`s.
///
/// Items surface as `Ok`, a failure as one final `Err`, and clean end as
/// stream termination.
pub fn into_stream<I>(iter: I) -> impl futures::Stream<Item = Result<I::Item, Fault>>
where
    I: SeqIter + 'static,
{
    futures::stream::unfold(Some(iter), |state| async move {
        let mut iter = state?;
        match iter.next().await {
            Step::Item(item) => Some((Ok(item), Some(iter))),
            Step::End => None,
            Step::Failed(fault) => Some((Err(fault), None)),
        }
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Instrumented sequences shared by the coordinator tests.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Wraps a sequence and counts how many elements its iterators pulled.
    pub struct Counted<S> {
        inner: S,
        pulls: Arc<AtomicUsize>,
    }

    impl<S> Counted<S> {
        pub fn new(inner: S) -> (Self, Arc<AtomicUsize>) {
            let pulls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    inner,
                    pulls: pulls.clone(),
                },
                pulls,
            )
        }
    }

    impl<S> Sequence for Counted<S>
    where
        S: Sequence + Sync,
    {
        type Item = S::Item;
        type Iter = CountedIter<S::Iter>;

        fn make_iter(&self) -> Self::Iter {
            CountedIter {
                inner: self.inner.make_iter(),
                pulls: self.pulls.clone(),
            }
        }
    }

    pub struct CountedIter<I> {
        inner: I,
        pulls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl<I> SeqIter for CountedIter<I>
    where
        I: SeqIter,
    {
        type Item = I::Item;

        async fn next(&mut self) -> Step<I::Item> {
            let step = self.inner.next().await;
            if matches!(step, Step::Item(_)) {
                self.pulls.fetch_add(1, Ordering::SeqCst);
            }
            step
        }
    }

    /// Collects every remaining element of an iterator, returning the
    /// elements and the terminal step that followed them.
    pub async fn drain<I>(iter: &mut I) -> (Vec<I::Item>, Step<I::Item>)
    where
        I: SeqIter,
    {
        let mut out = Vec::new();
        loop {
            match iter.next().await {
                Step::Item(value) => out.push(value),
                terminal => return (out, terminal),
            }
        }
    }
}
