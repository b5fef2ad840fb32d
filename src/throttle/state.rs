//! Throttle state machine.
//!
//! States follow the downstream/upstream interplay:
//!
//! - `Initial` — no demand yet; the upstream task is not even spawned.
//! - `WaitingForDemand` — no outstanding `next`; the upstream task folds at
//!   most one element ahead, then parks.
//! - `DemandSignalled` — a `next` is active and sleeping out the interval;
//!   the upstream keeps pulling and folding into the pending reduction.
//! - `Throttling` — the `next` is past its deadline with nothing folded yet;
//!   the first element to arrive is emitted to it directly.
//! - `UpstreamFailure` — the base raised before the failure was demanded.
//! - `Finished` — terminal; an unemitted final reduction may park here.
//!
//! Every event is total over these states; combinations that the single
//! consumer and single pull task cannot produce are programming errors.

use tokio::task::JoinHandle;
use tracing::trace;

use crate::resume::{Resumer, Suspension, suspension};
use crate::seq::{Fault, Step};

/// What a parked downstream is eventually told.
pub(super) enum Emission<R> {
    Reduced(R),
    End,
    Failed(Fault),
}

enum ThrottleState<R> {
    Initial,
    WaitingForDemand {
        upstream: Option<Resumer<()>>,
        reduction: Option<R>,
    },
    DemandSignalled {
        reduction: Option<R>,
    },
    Throttling {
        downstream: Resumer<Emission<R>>,
    },
    UpstreamFailure(Fault),
    Finished {
        pending: Option<R>,
    },
}

pub(super) struct Machine<R> {
    state: ThrottleState<R>,
    task: Option<JoinHandle<()>>,
}

/// Outcome of signalling downstream demand (entry of `next`).
pub(super) enum Demand<R> {
    /// Demand recorded; sleep out the interval, then `collect`.
    Proceed { wake_upstream: Option<Resumer<()>> },
    /// Terminal drain: emit the final reduction immediately.
    Drain(R),
    Fail(Fault),
    End,
}

/// Outcome of collecting after the interval sleep.
pub(super) enum Collect<R> {
    Emit(R),
    Park(Suspension<Emission<R>>),
    Fail(Fault),
    End,
}

/// What the pull task does after feeding a step.
pub(super) enum Feed {
    Continue,
    Park(Suspension<()>),
    Exit,
}

impl<R> Machine<R> {
    pub(super) fn new() -> Self {
        Self {
            state: ThrottleState::Initial,
            task: None,
        }
    }

    /// True when the pull task has not been spawned yet.
    pub(super) fn needs_task(&mut self) -> bool {
        if matches!(self.state, ThrottleState::Initial) {
            self.state = ThrottleState::WaitingForDemand {
                upstream: None,
                reduction: None,
            };
            true
        } else {
            false
        }
    }

    pub(super) fn task_started(&mut self, handle: JoinHandle<()>) {
        if matches!(self.state, ThrottleState::Finished { .. }) {
            handle.abort();
        } else {
            self.task = Some(handle);
        }
    }

    pub(super) fn signal_demand(&mut self) -> Demand<R> {
        match std::mem::replace(&mut self.state, ThrottleState::Initial) {
            ThrottleState::WaitingForDemand {
                upstream,
                reduction,
            } => {
                self.state = ThrottleState::DemandSignalled { reduction };
                Demand::Proceed {
                    wake_upstream: upstream,
                }
            }
            ThrottleState::UpstreamFailure(fault) => {
                // the failure pre-empts the interval
                self.state = ThrottleState::Finished { pending: None };
                Demand::Fail(fault)
            }
            ThrottleState::Finished { pending: Some(r) } => {
                // terminal drain is exempt from the rate cap
                self.state = ThrottleState::Finished { pending: None };
                Demand::Drain(r)
            }
            ThrottleState::Finished { pending: None } => {
                self.state = ThrottleState::Finished { pending: None };
                Demand::End
            }
            ThrottleState::Initial
            | ThrottleState::DemandSignalled { .. }
            | ThrottleState::Throttling { .. } => {
                unreachable!("throttle: demand signalled twice without a collect")
            }
        }
    }

    pub(super) fn collect(&mut self) -> Collect<R> {
        match std::mem::replace(&mut self.state, ThrottleState::Initial) {
            ThrottleState::DemandSignalled {
                reduction: Some(reduction),
            } => {
                self.state = ThrottleState::WaitingForDemand {
                    upstream: None,
                    reduction: None,
                };
                Collect::Emit(reduction)
            }
            ThrottleState::DemandSignalled { reduction: None } => {
                let (resumer, suspended) = suspension();
                self.state = ThrottleState::Throttling {
                    downstream: resumer,
                };
                Collect::Park(suspended)
            }
            ThrottleState::UpstreamFailure(fault) => {
                self.state = ThrottleState::Finished { pending: None };
                Collect::Fail(fault)
            }
            ThrottleState::Finished { pending: Some(r) } => {
                self.state = ThrottleState::Finished { pending: None };
                Collect::Emit(r)
            }
            ThrottleState::Finished { pending: None } => {
                self.state = ThrottleState::Finished { pending: None };
                Collect::End
            }
            ThrottleState::Initial
            | ThrottleState::WaitingForDemand { .. }
            | ThrottleState::Throttling { .. } => {
                unreachable!("throttle: collect without a signalled demand")
            }
        }
    }

    /// The consumer's `next` future went away mid-interval; demand rescinds
    /// and any pending reduction survives for the next call.
    pub(super) fn rescind_demand(&mut self) {
        match std::mem::replace(&mut self.state, ThrottleState::Initial) {
            ThrottleState::DemandSignalled { reduction } => {
                self.state = ThrottleState::WaitingForDemand {
                    upstream: None,
                    reduction,
                };
            }
            ThrottleState::Throttling { .. } => {
                self.state = ThrottleState::WaitingForDemand {
                    upstream: None,
                    reduction: None,
                };
            }
            other => self.state = other,
        }
    }

    /// The pull task publishes one upstream step, folding with `reduce`.
    pub(super) fn feed<T, F>(
        &mut self,
        step: Step<T>,
        reduce: &mut F,
    ) -> (Option<(Resumer<Emission<R>>, Emission<R>)>, Feed)
    where
        F: FnMut(Option<R>, T) -> R,
    {
        match step {
            Step::Item(item) => {
                match std::mem::replace(&mut self.state, ThrottleState::Initial) {
                    ThrottleState::DemandSignalled { reduction } => {
                        // folded while the consumer sleeps out the interval
                        self.state = ThrottleState::DemandSignalled {
                            reduction: Some(reduce(reduction, item)),
                        };
                        (None, Feed::Continue)
                    }
                    ThrottleState::Throttling { downstream } => {
                        // past-deadline demand: a fresh interval starts now
                        let reduced = reduce(None, item);
                        self.state = ThrottleState::WaitingForDemand {
                            upstream: None,
                            reduction: None,
                        };
                        (Some((downstream, Emission::Reduced(reduced))), Feed::Continue)
                    }
                    ThrottleState::WaitingForDemand {
                        upstream,
                        reduction,
                    } => {
                        debug_assert!(upstream.is_none(), "pull task fed while parked");
                        let _ = upstream;
                        let (resumer, suspended) = suspension();
                        self.state = ThrottleState::WaitingForDemand {
                            upstream: Some(resumer),
                            reduction: Some(reduce(reduction, item)),
                        };
                        (None, Feed::Park(suspended))
                    }
                    ThrottleState::Initial => {
                        unreachable!("throttle: element fed before first demand")
                    }
                    // the cursor latched terminal while the pull was in
                    // flight; the late element is discarded
                    terminal @ (ThrottleState::UpstreamFailure(_)
                    | ThrottleState::Finished { .. }) => {
                        self.state = terminal;
                        (None, Feed::Exit)
                    }
                }
            }
            Step::End => {
                trace!("throttle upstream ended");
                match std::mem::replace(&mut self.state, ThrottleState::Finished { pending: None })
                {
                    ThrottleState::Throttling { downstream } => {
                        (Some((downstream, Emission::End)), Feed::Exit)
                    }
                    ThrottleState::DemandSignalled { reduction }
                    | ThrottleState::WaitingForDemand { reduction, .. } => {
                        self.state = ThrottleState::Finished { pending: reduction };
                        (None, Feed::Exit)
                    }
                    ThrottleState::Initial => {
                        unreachable!("throttle: end fed before first demand")
                    }
                    terminal @ (ThrottleState::UpstreamFailure(_)
                    | ThrottleState::Finished { .. }) => {
                        self.state = terminal;
                        (None, Feed::Exit)
                    }
                }
            }
            Step::Failed(fault) => {
                trace!("throttle upstream failed");
                match std::mem::replace(&mut self.state, ThrottleState::Finished { pending: None })
                {
                    ThrottleState::Throttling { downstream } => {
                        (Some((downstream, Emission::Failed(fault))), Feed::Exit)
                    }
                    ThrottleState::DemandSignalled { .. }
                    | ThrottleState::WaitingForDemand { .. } => {
                        // a pending reduction is discarded by a failure
                        self.state = ThrottleState::UpstreamFailure(fault);
                        (None, Feed::Exit)
                    }
                    ThrottleState::Initial => {
                        unreachable!("throttle: failure fed before first demand")
                    }
                    terminal @ (ThrottleState::UpstreamFailure(_)
                    | ThrottleState::Finished { .. }) => {
                        self.state = terminal;
                        (None, Feed::Exit)
                    }
                }
            }
        }
    }

    /// The consumer's cursor was dropped: latch finished and stop the task.
    pub(super) fn abort(&mut self) -> Option<JoinHandle<()>> {
        self.state = ThrottleState::Finished { pending: None };
        self.task.take()
    }
}
