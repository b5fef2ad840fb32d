//! Emission state machine for the rendezvous channel.
//!
//! The four states mirror the channel's observable condition:
//!
//! - `Idle` — nobody is suspended.
//! - `Pending` — senders are queued, each carrying its element.
//! - `Awaiting` — receivers are queued.
//! - `Finished` — terminal; an optional undelivered fault parks here until a
//!   receiver claims it.
//!
//! `Pending` and `Awaiting` are mutually exclusive: a send facing a waiting
//! receiver matches instead of queueing, and vice versa. Every transition
//! returns the continuations to fire so the caller can resume them outside
//! the critical region.

use std::collections::VecDeque;
use std::mem;

use crate::resume::{Resumer, Suspension, suspension};
use crate::seq::{Fault, Step};

/// What a suspended sender is eventually told.
pub(super) enum SendOutcome<T> {
    /// A receiver took the element.
    Delivered,
    /// The channel finished first; the element comes back undelivered.
    Closed(T),
}

pub(super) struct PendingSend<T> {
    token: u64,
    element: T,
    resumer: Resumer<SendOutcome<T>>,
}

pub(super) struct PendingNext<T> {
    token: u64,
    resumer: Resumer<Step<T>>,
}

pub(super) enum Emission<T> {
    Idle,
    Pending(VecDeque<PendingSend<T>>),
    Awaiting(VecDeque<PendingNext<T>>),
    Finished(Option<Fault>),
}

pub(super) struct ChannelState<T> {
    emission: Emission<T>,
    next_token: u64,
}

/// Decision handed back to `send`, resolved outside the lock.
pub(super) enum SendAction<T> {
    /// A receiver was waiting; resume it with the element.
    Handed(Resumer<Step<T>>, T),
    /// Already finished; the element goes back to the caller.
    Closed(T),
    /// Queue position taken; suspend until matched or finished.
    Suspend(Suspension<SendOutcome<T>>, u64),
}

/// Decision handed back to `next`, resolved outside the lock.
pub(super) enum NextAction<T> {
    Ready(Step<T>),
    /// A sender was waiting; resume it and return its element.
    Handed(Resumer<SendOutcome<T>>, T),
    Suspend(Suspension<Step<T>>, u64),
}

/// Continuations drained by a terminal transition.
pub(super) enum Drained<T> {
    None,
    Sends(VecDeque<PendingSend<T>>),
    /// Waiting receivers; when the terminal event was a failure, the head
    /// receiver consumes the fault and the rest see clean end.
    Nexts(VecDeque<PendingNext<T>>, Option<Fault>),
}

impl<T> ChannelState<T> {
    pub(super) fn new() -> Self {
        Self {
            emission: Emission::Idle,
            next_token: 0,
        }
    }

    fn token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    pub(super) fn on_send(&mut self, element: T) -> SendAction<T> {
        match mem::replace(&mut self.emission, Emission::Idle) {
            Emission::Finished(fault) => {
                self.emission = Emission::Finished(fault);
                SendAction::Closed(element)
            }
            Emission::Awaiting(mut nexts) => {
                let receiver = nexts
                    .pop_front()
                    .expect("awaiting state is never empty");
                if !nexts.is_empty() {
                    self.emission = Emission::Awaiting(nexts);
                }
                SendAction::Handed(receiver.resumer, element)
            }
            Emission::Idle => {
                let token = self.token();
                let (resumer, suspended) = suspension();
                let mut sends = VecDeque::new();
                sends.push_back(PendingSend {
                    token,
                    element,
                    resumer,
                });
                self.emission = Emission::Pending(sends);
                SendAction::Suspend(suspended, token)
            }
            Emission::Pending(mut sends) => {
                let token = self.token();
                let (resumer, suspended) = suspension();
                sends.push_back(PendingSend {
                    token,
                    element,
                    resumer,
                });
                self.emission = Emission::Pending(sends);
                SendAction::Suspend(suspended, token)
            }
        }
    }

    pub(super) fn on_next(&mut self) -> NextAction<T> {
        match mem::replace(&mut self.emission, Emission::Idle) {
            Emission::Finished(fault) => {
                // a parked fault goes to exactly one receiver
                self.emission = Emission::Finished(None);
                match fault {
                    Some(fault) => NextAction::Ready(Step::Failed(fault)),
                    None => NextAction::Ready(Step::End),
                }
            }
            Emission::Pending(mut sends) => {
                let sender = sends.pop_front().expect("pending state is never empty");
                if !sends.is_empty() {
                    self.emission = Emission::Pending(sends);
                }
                NextAction::Handed(sender.resumer, sender.element)
            }
            Emission::Idle => {
                let token = self.token();
                let (resumer, suspended) = suspension();
                let mut nexts = VecDeque::new();
                nexts.push_back(PendingNext { token, resumer });
                self.emission = Emission::Awaiting(nexts);
                NextAction::Suspend(suspended, token)
            }
            Emission::Awaiting(mut nexts) => {
                let token = self.token();
                let (resumer, suspended) = suspension();
                nexts.push_back(PendingNext { token, resumer });
                self.emission = Emission::Awaiting(nexts);
                NextAction::Suspend(suspended, token)
            }
        }
    }

    /// Latches `Finished`, carrying `fault` if the terminal event was a
    /// failure. Returns the suspended parties to resume. Idempotent: a second
    /// terminal event neither fires continuations nor replaces the first.
    pub(super) fn on_terminal(&mut self, fault: Option<Fault>) -> Drained<T> {
        match mem::replace(&mut self.emission, Emission::Idle) {
            Emission::Finished(first) => {
                self.emission = Emission::Finished(first);
                Drained::None
            }
            Emission::Idle => {
                self.emission = Emission::Finished(fault);
                Drained::None
            }
            Emission::Pending(sends) => {
                self.emission = Emission::Finished(fault);
                Drained::Sends(sends)
            }
            Emission::Awaiting(nexts) => {
                // a waiting receiver consumes the fault right away
                self.emission = Emission::Finished(None);
                Drained::Nexts(nexts, fault)
            }
        }
    }

    /// Withdraws a suspended send; no-op if it was already matched.
    pub(super) fn withdraw_send(&mut self, token: u64) {
        if let Emission::Pending(sends) = &mut self.emission {
            sends.retain(|entry| entry.token != token);
            if sends.is_empty() {
                self.emission = Emission::Idle;
            }
        }
    }

    /// Withdraws a suspended receive; no-op if it was already matched.
    pub(super) fn withdraw_next(&mut self, token: u64) {
        if let Emission::Awaiting(nexts) = &mut self.emission {
            nexts.retain(|entry| entry.token != token);
            if nexts.is_empty() {
                self.emission = Emission::Idle;
            }
        }
    }
}

impl<T> PendingSend<T> {
    pub(super) fn into_parts(self) -> (T, Resumer<SendOutcome<T>>) {
        (self.element, self.resumer)
    }
}

impl<T> PendingNext<T> {
    pub(super) fn into_resumer(self) -> Resumer<Step<T>> {
        self.resumer
    }
}
