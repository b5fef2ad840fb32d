//! Boundary-signal chunking.
//!
//! Elements accumulate into a chunk until the signal sequence fires, which
//! seals and emits the chunk (empty chunks are skipped). Internally the base
//! and the signal are interleaved through a rendezvous [`Channel`] of
//! element/boundary events, one pump task per side.

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::channel::{Channel, ChannelIter};
use crate::seq::{SeqIter, Sequence, Step};

enum ChunkEvent<T> {
    Element(T),
    Boundary,
}

/// Sequence returned by
/// [`SequenceExt::chunked_by`](super::SequenceExt::chunked_by).
pub struct ChunkedBy<S, B> {
    source: S,
    signal: B,
}

impl<S, B> ChunkedBy<S, B> {
    pub(super) fn new(source: S, signal: B) -> Self {
        Self { source, signal }
    }
}

impl<S, B> Sequence for ChunkedBy<S, B>
where
    S: Sequence + 'static,
    B: Sequence + 'static,
    S::Item: Send + 'static,
    S::Iter: 'static,
    B::Iter: 'static,
{
    type Item = Vec<S::Item>;
    type Iter = ChunkedByIter<S::Iter, B::Iter>;

    fn make_iter(&self) -> Self::Iter {
        let chan = Channel::new();
        ChunkedByIter {
            base: Some(self.source.make_iter()),
            signal: Some(self.signal.make_iter()),
            events: chan.make_iter(),
            chan,
            pumps: Vec::new(),
            done: false,
        }
    }
}

/// Cursor over a [`ChunkedBy`]; owns the two pump tasks it spawns on first
/// demand.
pub struct ChunkedByIter<I, G>
where
    I: SeqIter,
    I::Item: 'static,
{
    base: Option<I>,
    signal: Option<G>,
    chan: Channel<ChunkEvent<I::Item>>,
    events: ChannelIter<ChunkEvent<I::Item>>,
    pumps: Vec<JoinHandle<()>>,
    done: bool,
}

#[async_trait]
impl<I, G> SeqIter for ChunkedByIter<I, G>
where
    I: SeqIter + 'static,
    G: SeqIter + 'static,
    I::Item: 'static,
{
    type Item = Vec<I::Item>;

    async fn next(&mut self) -> Step<Vec<I::Item>> {
        if self.done {
            return Step::End;
        }
        if let (Some(base), Some(signal)) = (self.base.take(), self.signal.take()) {
            self.pumps
                .push(tokio::spawn(pump_elements(base, self.chan.clone())));
            self.pumps
                .push(tokio::spawn(pump_boundaries(signal, self.chan.clone())));
        }
        let mut chunk = Vec::new();
        loop {
            match self.events.next().await {
                Step::Item(ChunkEvent::Element(item)) => chunk.push(item),
                Step::Item(ChunkEvent::Boundary) => {
                    if !chunk.is_empty() {
                        return Step::Item(chunk);
                    }
                }
                Step::End => {
                    self.done = true;
                    return if chunk.is_empty() {
                        Step::End
                    } else {
                        // residual chunk after the base ended
                        Step::Item(chunk)
                    };
                }
                Step::Failed(fault) => {
                    self.done = true;
                    return Step::Failed(fault);
                }
            }
        }
    }
}

impl<I, G> Drop for ChunkedByIter<I, G>
where
    I: SeqIter,
    I::Item: 'static,
{
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
        self.chan.finish();
    }
}

/// The base drives termination: its end finishes the event channel.
async fn pump_elements<I>(mut iter: I, chan: Channel<ChunkEvent<I::Item>>)
where
    I: SeqIter,
    I::Item: 'static,
{
    loop {
        match iter.next().await {
            Step::Item(item) => {
                if chan.send(ChunkEvent::Element(item)).await.is_err() {
                    return;
                }
            }
            Step::End => {
                chan.finish();
                return;
            }
            Step::Failed(fault) => {
                chan.fail_with(fault);
                return;
            }
        }
    }
}

/// The signal only punctuates; its clean end is not a terminal event.
async fn pump_boundaries<G, T>(mut signal: G, chan: Channel<ChunkEvent<T>>)
where
    G: SeqIter,
    T: Send + 'static,
{
    loop {
        match signal.next().await {
            Step::Item(_) => {
                if chan.send(ChunkEvent::Boundary).await.is_err() {
                    return;
                }
            }
            Step::End => return,
            Step::Failed(fault) => {
                chan.fail_with(fault);
                return;
            }
        }
    }
}
