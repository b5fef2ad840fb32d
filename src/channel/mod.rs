//! Rendezvous channel.
//!
//! A synchronous, unbuffered transport between producers and consumers: a
//! [`send`](Channel::send) completes only once its element has been handed to
//! some [`next`](Channel::next), or once the channel terminates.
//!
//! ## How It Works
//!
//! ```text
//!   send(a) ──┐                       ┌── next()
//!   send(b) ──┤  pending  ⇄  awaiting ├── next()
//!   send(c) ──┘   sends       nexts   └── next()
//!
//!   matching is FIFO on both queues; at any instant at most one
//!   queue is non-empty
//! ```
//!
//! A send that meets a waiting receiver hands its element over and both
//! resume; otherwise the sender parks. [`finish`](Channel::finish) resumes
//! every parked party — senders get their element back undelivered,
//! receivers get clean end. [`fail`](Channel::fail) does the same but
//! delivers the error to the next receiver (parking it until one arrives).
//!
//! Dropping a suspended `send` or `next` future withdraws exactly that
//! entry; other parked parties are not disturbed.
//!
//! ## Multiple producers, multiple consumers
//!
//! The channel is a cheap clone (`Arc` inside); any number of tasks may send
//! and receive concurrently. Elements are matched FIFO per queue, so a
//! single sender/receiver pair observes send order.
//!
//! ## Example
//!
//! ```
//! use flusso::channel::Channel;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let chan = Channel::new();
//! let tx = chan.clone();
//! tokio::spawn(async move {
//!     tx.send(1).await.unwrap();
//!     tx.finish();
//! });
//! assert_eq!(chan.next().await.item(), Some(1));
//! assert!(chan.next().await.is_terminal());
//! # });
//! ```

mod state;

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::error::Closed;
use crate::seq::{Fault, SeqIter, Sequence, Step, fault};
use crate::state::StateCell;

use state::{ChannelState, Drained, NextAction, SendAction, SendOutcome};

/// An unbuffered element exchange; see the [module docs](self).
pub struct Channel<T> {
    state: Arc<StateCell<ChannelState<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for Channel<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Channel<T>
where
    T: Send + 'static,
{
    /// Creates an open channel.
    pub fn new() -> Self {
        Self {
            state: Arc::new(StateCell::new(ChannelState::new())),
        }
    }

    /// Delivers `element` to a receiver, suspending until one takes it.
    ///
    /// Returns `Err(Closed(element))` — the element handed back undelivered —
    /// if the channel finishes first. Dropping the returned future while
    /// suspended withdraws the pending send; the element is dropped with it.
    pub async fn send(&self, element: T) -> Result<(), Closed<T>> {
        let action = self.state.with(|chan| chan.on_send(element));
        match action {
            SendAction::Handed(receiver, element) => {
                receiver.resume(Step::Item(element));
                Ok(())
            }
            SendAction::Closed(element) => Err(Closed(element)),
            SendAction::Suspend(suspended, token) => {
                let guard = WithdrawSend {
                    state: &self.state,
                    token,
                };
                let outcome = suspended
                    .wait()
                    .await
                    .expect("pending send dropped without resumption");
                guard.disarm();
                match outcome {
                    SendOutcome::Delivered => Ok(()),
                    SendOutcome::Closed(element) => Err(Closed(element)),
                }
            }
        }
    }

    /// Resolves to the next element sent, or a terminal step.
    ///
    /// Suspends until a sender delivers. After `finish`, returns
    /// [`Step::End`]; after `fail`, one call observes the failure and the
    /// rest see clean end. Dropping the returned future while suspended
    /// withdraws the pending receive.
    pub async fn next(&self) -> Step<T> {
        let action = self.state.with(|chan| chan.on_next());
        match action {
            NextAction::Ready(step) => step,
            NextAction::Handed(sender, element) => {
                sender.resume(SendOutcome::Delivered);
                Step::Item(element)
            }
            NextAction::Suspend(suspended, token) => {
                let guard = WithdrawNext {
                    state: &self.state,
                    token,
                };
                let step = suspended.wait().await.unwrap_or(Step::End);
                guard.disarm();
                step
            }
        }
    }

    /// Terminates the channel cleanly.
    ///
    /// Every pending send resolves without delivering (element handed back),
    /// every pending `next` resolves with clean end. Idempotent.
    pub fn finish(&self) {
        let drained = self.state.with(|chan| chan.on_terminal(None));
        trace!("channel finished");
        resolve(drained);
    }

    /// Terminates the channel with a failure.
    ///
    /// Pending sends resolve without delivering. The failure goes to the
    /// next receiver — immediately if one is waiting, otherwise it parks
    /// until one arrives. A second terminal call is a no-op.
    pub fn fail<E>(&self, error: E)
    where
        E: Error + Send + Sync + 'static,
    {
        self.fail_with(fault(error));
    }

    pub(crate) fn fail_with(&self, fault: Fault) {
        let drained = self.state.with(|chan| chan.on_terminal(Some(fault)));
        trace!("channel failed");
        resolve(drained);
    }
}

fn resolve<T>(drained: Drained<T>) {
    match drained {
        Drained::None => {}
        Drained::Sends(sends) => {
            for entry in sends {
                let (element, resumer) = entry.into_parts();
                resumer.resume(SendOutcome::Closed(element));
            }
        }
        Drained::Nexts(nexts, fault) => {
            let mut fault = fault;
            for entry in nexts {
                let step = match fault.take() {
                    Some(fault) => Step::Failed(fault),
                    None => Step::End,
                };
                entry.into_resumer().resume(step);
            }
        }
    }
}

struct WithdrawSend<'a, T> {
    state: &'a StateCell<ChannelState<T>>,
    token: u64,
}

impl<T> WithdrawSend<'_, T> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl<T> Drop for WithdrawSend<'_, T> {
    fn drop(&mut self) {
        let token = self.token;
        self.state.with(|chan| chan.withdraw_send(token));
    }
}

struct WithdrawNext<'a, T> {
    state: &'a StateCell<ChannelState<T>>,
    token: u64,
}

impl<T> WithdrawNext<'_, T> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl<T> Drop for WithdrawNext<'_, T> {
    fn drop(&mut self) {
        let token = self.token;
        self.state.with(|chan| chan.withdraw_next(token));
    }
}

impl<T> Sequence for Channel<T>
where
    T: Send + 'static,
{
    type Item = T;
    type Iter = ChannelIter<T>;

    fn make_iter(&self) -> Self::Iter {
        ChannelIter {
            chan: self.clone(),
            done: false,
        }
    }
}

/// Cursor over a [`Channel`]; one of possibly many concurrent receivers.
pub struct ChannelIter<T> {
    chan: Channel<T>,
    done: bool,
}

#[async_trait]
impl<T> SeqIter for ChannelIter<T>
where
    T: Send + 'static,
{
    type Item = T;

    async fn next(&mut self) -> Step<T> {
        if self.done {
            return Step::End;
        }
        let step = self.chan.next().await;
        if step.is_terminal() {
            self.done = true;
        }
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("producer failed")]
    struct ProducerFailed;

    /// Scenario: three sends rendezvous with three nexts; the fourth next
    /// resolves to end only after finish.
    #[tokio::test]
    async fn rendezvous_in_order() {
        let chan = Channel::new();
        let tx = chan.clone();
        let sender = tokio::spawn(async move {
            for value in [10, 20, 30] {
                tx.send(value).await.unwrap();
            }
            tx.finish();
        });
        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(chan.next().await.item().unwrap());
        }
        assert_eq!(got, vec![10, 20, 30]);
        assert!(matches!(chan.next().await, Step::End));
        sender.await.unwrap();
    }

    /// A send must not complete before some receiver takes the element.
    #[tokio::test]
    async fn send_suspends_until_received() {
        let chan = Channel::new();
        let delivered = Arc::new(AtomicBool::new(false));
        let tx = chan.clone();
        let flag = delivered.clone();
        tokio::spawn(async move {
            tx.send(1).await.unwrap();
            flag.store(true, Ordering::SeqCst);
        });
        tokio::task::yield_now().await;
        assert!(!delivered.load(Ordering::SeqCst));
        assert_eq!(chan.next().await.item(), Some(1));
        tokio::task::yield_now().await;
        assert!(delivered.load(Ordering::SeqCst));
    }

    /// After finish, every parked party resolves and later sends bounce.
    #[tokio::test]
    async fn finish_unblocks_everyone() {
        let chan = Channel::new();
        let tx = chan.clone();
        let parked_send = tokio::spawn(async move { tx.send(5).await });
        let rx = chan.clone();
        let parked_next = tokio::spawn(async move { rx.next().await });
        tokio::task::yield_now().await;

        chan.finish();
        chan.finish(); // idempotent

        // exactly one of the two parked parties matched the other before the
        // finish; both must resolve either way
        let send_result = parked_send.await.unwrap();
        let next_result = parked_next.await.unwrap();
        match send_result {
            Ok(()) => assert_eq!(next_result.item(), Some(5)),
            Err(Closed(value)) => {
                assert_eq!(value, 5);
                assert!(matches!(next_result, Step::End));
            }
        }
        assert!(matches!(chan.send(6).await, Err(Closed(6))));
        assert!(matches!(chan.next().await, Step::End));
    }

    /// The failure goes to the next receiver; everyone after sees end.
    #[tokio::test]
    async fn fail_reaches_one_receiver() {
        let chan = Channel::<u8>::new();
        chan.fail(ProducerFailed);
        assert!(chan.next().await.is_failure());
        assert!(matches!(chan.next().await, Step::End));
    }

    /// A waiting receiver consumes the failure immediately.
    #[tokio::test]
    async fn fail_resumes_waiting_receiver() {
        let chan = Channel::<u8>::new();
        let rx = chan.clone();
        let waiting = tokio::spawn(async move { rx.next().await });
        tokio::task::yield_now().await;
        chan.fail(ProducerFailed);
        assert!(waiting.await.unwrap().is_failure());
        assert!(matches!(chan.next().await, Step::End));
    }

    /// Cancelling one parked send leaves the others in place.
    #[tokio::test]
    async fn cancelled_send_is_withdrawn() {
        let chan = Channel::new();
        let tx1 = chan.clone();
        let first = tokio::spawn(async move { tx1.send(1).await });
        tokio::task::yield_now().await;
        let tx2 = chan.clone();
        let second = tokio::spawn(async move { tx2.send(2).await });
        tokio::task::yield_now().await;

        first.abort();
        let _ = first.await;

        // the withdrawn head must not surface; the survivor must
        assert_eq!(chan.next().await.item(), Some(2));
        second.await.unwrap().unwrap();
        chan.finish();
    }

    /// A cancelled receiver returns end and gives up its queue slot.
    #[tokio::test]
    async fn cancelled_next_is_withdrawn() {
        let chan = Channel::new();
        let rx1 = chan.clone();
        let first = tokio::spawn(async move { rx1.next().await });
        let rx2 = chan.clone();
        let second = tokio::spawn(async move { rx2.next().await });
        tokio::task::yield_now().await;

        first.abort();
        let _ = first.await;

        chan.send(7).await.unwrap();
        assert_eq!(second.await.unwrap().item(), Some(7));
        chan.finish();
    }

    /// FIFO for a single sender and single receiver.
    #[tokio::test]
    async fn fifo_per_pair() {
        let chan = Channel::new();
        let tx = chan.clone();
        tokio::spawn(async move {
            for value in 0..32 {
                if tx.send(value).await.is_err() {
                    break;
                }
            }
            tx.finish();
        });
        let mut iter = chan.make_iter();
        let mut seen = Vec::new();
        while let Step::Item(value) = iter.next().await {
            seen.push(value);
        }
        assert_eq!(seen, (0..32).collect::<Vec<_>>());
    }
}
