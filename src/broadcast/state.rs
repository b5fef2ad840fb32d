//! Role-assignment state machine for the lock-step broadcast.
//!
//! One cycle produces exactly one base element. Within a cycle each runner is
//! assigned a role when it asks for its next element:
//!
//! - `Fetch` — first requester of the cycle; drives the shared base iterator.
//! - `Wait` — the fetch is in flight; park until its result is published.
//! - `Yield` — the cycle already completed; take the cached result.
//! - `Hold` — the runner already consumed this cycle and is parked in the
//!   next one until everyone catches up.
//!
//! A runner's `cycle` field doubles as its consumption record: advancing it
//! past the current cycle acknowledges the cycle's element. The machine never
//! advances a runner that has not taken its element, so a runner whose `next`
//! future is dropped mid-wait re-observes the cycle result as `Yield` later —
//! this also makes failure delivery exactly-once per runner: the latched
//! `Done(Failed)` result is handed to each unadvanced runner exactly once,
//! after which that runner sees clean end. The cycle finalizes when no runner
//! is left in it; only then does the next fetch begin.

use std::collections::HashMap;
use std::collections::VecDeque;

use tracing::trace;

use crate::policy::DisposalPolicy;
use crate::resume::{Resumer, Suspension, suspension};
use crate::seq::{Sequence, Step};
use crate::upstream::SharedIter;

pub(super) type RunnerId = u64;

/// What a parked WAITer is eventually told.
pub(super) enum WaitOutcome<T> {
    /// The fetch completed; consume this result and acknowledge.
    Result(Step<T>),
    /// The FETCHer abandoned the cycle; ask for a role again.
    Rerun,
}

/// Role assigned to a runner for the current cycle.
pub(super) enum Role<T> {
    Fetch(SharedIter<T>),
    Wait(Suspension<WaitOutcome<T>>),
    Hold(Suspension<()>),
    /// Cached result plus any holder continuations unblocked by taking it.
    Yield(Step<T>, Vec<Resumer<()>>),
}

/// Registration outcome for a new runner.
pub(super) enum Establish<T> {
    Active { id: RunnerId, prefix: VecDeque<T> },
    Terminal,
}

enum Phase<T> {
    Pending,
    Fetching,
    Done(Step<T>),
}

struct Runner<T> {
    /// Cycle this runner participates in; advancing past the current cycle
    /// records that it consumed the cycle's element.
    cycle: u8,
    waiting: Option<Resumer<WaitOutcome<T>>>,
    holding: Option<Resumer<()>>,
}

pub(super) struct BroadcastState<S: Sequence> {
    source: S,
    base: Option<SharedIter<S::Item>>,
    phase: Phase<S::Item>,
    cycle: u8,
    runners: HashMap<RunnerId, Runner<S::Item>>,
    history: VecDeque<S::Item>,
    history_limit: usize,
    disposal: DisposalPolicy,
    terminal: bool,
    next_id: RunnerId,
}

impl<S> BroadcastState<S>
where
    S: Sequence + 'static,
    S::Item: Clone + Send + 'static,
    S::Iter: 'static,
{
    pub(super) fn new(source: S, history_limit: usize, disposal: DisposalPolicy) -> Self {
        Self {
            source,
            base: None,
            phase: Phase::Pending,
            cycle: 0,
            runners: HashMap::new(),
            history: VecDeque::new(),
            history_limit,
            disposal,
            terminal: false,
            next_id: 0,
        }
    }

    pub(super) fn establish(&mut self) -> Establish<S::Item> {
        if self.terminal {
            return Establish::Terminal;
        }
        let id = self.next_id;
        self.next_id += 1;
        // joining while the current cycle is done would replay the cycle's
        // element on top of the history snapshot that already contains it
        let cycle = match self.phase {
            Phase::Done(_) => self.cycle ^ 1,
            Phase::Pending | Phase::Fetching => self.cycle,
        };
        self.runners.insert(
            id,
            Runner {
                cycle,
                waiting: None,
                holding: None,
            },
        );
        trace!(id, cycle, "broadcast runner established");
        Establish::Active {
            id,
            prefix: self.history.clone(),
        }
    }

    pub(super) fn start_run(&mut self, id: RunnerId) -> Role<S::Item> {
        let current = self.cycle;
        let Some(runner) = self.runners.get_mut(&id) else {
            return Role::Yield(Step::End, Vec::new());
        };
        if self.terminal {
            // an unconsumed terminal result is taken exactly once
            if runner.cycle == current {
                if let Phase::Done(step) = &self.phase {
                    let step = step.clone();
                    self.runners
                        .get_mut(&id)
                        .expect("runner checked above")
                        .cycle = current ^ 1;
                    return Role::Yield(step, Vec::new());
                }
            }
            return Role::Yield(Step::End, Vec::new());
        }
        if runner.cycle != current {
            let (resumer, suspended) = suspension();
            runner.holding = Some(resumer);
            return Role::Hold(suspended);
        }
        match &self.phase {
            Phase::Pending => {
                let base = self.ensure_base();
                self.phase = Phase::Fetching;
                Role::Fetch(base)
            }
            Phase::Fetching => {
                let (resumer, suspended) = suspension();
                self.runners
                    .get_mut(&id)
                    .expect("runner checked above")
                    .waiting = Some(resumer);
                Role::Wait(suspended)
            }
            Phase::Done(step) => {
                let step = step.clone();
                self.runners
                    .get_mut(&id)
                    .expect("runner checked above")
                    .cycle = current ^ 1;
                let holders = self.maybe_finalize();
                Role::Yield(step, holders)
            }
        }
    }

    /// The FETCH runner publishes the base's result.
    ///
    /// Returns the step this runner yields, the WAITer continuations to fire
    /// and the holder continuations unblocked by finalization.
    #[allow(clippy::type_complexity)]
    pub(super) fn fetch_report(
        &mut self,
        id: RunnerId,
        step: Step<S::Item>,
    ) -> (
        Step<S::Item>,
        Vec<(Resumer<WaitOutcome<S::Item>>, WaitOutcome<S::Item>)>,
        Vec<Resumer<()>>,
    ) {
        if self.terminal {
            // aborted while the fetch was in flight
            return (Step::End, Vec::new(), Vec::new());
        }
        match &step {
            Step::Item(item) => {
                if self.history_limit > 0 {
                    self.history.push_back(item.clone());
                    if self.history.len() > self.history_limit {
                        self.history.pop_front();
                    }
                }
            }
            Step::End | Step::Failed(_) => self.latch_terminal(),
        }
        self.phase = Phase::Done(step.clone());
        let waiters: Vec<_> = self
            .runners
            .values_mut()
            .filter_map(|runner| {
                let resumer = runner.waiting.take()?;
                Some((resumer, WaitOutcome::Result(step.clone())))
            })
            .collect();
        if let Some(runner) = self.runners.get_mut(&id) {
            runner.cycle = self.cycle ^ 1;
        }
        let holders = self.maybe_finalize();
        trace!(
            id,
            cycle = self.cycle,
            waiters = waiters.len(),
            "fetch published"
        );
        (step, waiters, holders)
    }

    /// A WAITer acknowledges the result it received.
    pub(super) fn complete(&mut self, id: RunnerId) -> Vec<Resumer<()>> {
        if let Some(runner) = self.runners.get_mut(&id) {
            runner.cycle = self.cycle ^ 1;
        }
        self.maybe_finalize()
    }

    /// The FETCHer abandoned the cycle before reporting; rewind the phase and
    /// let the WAITers race for a fresh role.
    pub(super) fn abort_fetch(
        &mut self,
    ) -> Vec<(Resumer<WaitOutcome<S::Item>>, WaitOutcome<S::Item>)> {
        if self.terminal || !matches!(self.phase, Phase::Fetching) {
            return Vec::new();
        }
        self.phase = Phase::Pending;
        self.runners
            .values_mut()
            .filter_map(|runner| Some((runner.waiting.take()?, WaitOutcome::Rerun)))
            .collect()
    }

    /// Drops a parked WAIT continuation whose future went away. The runner
    /// stays in its cycle; the result is re-observed as `Yield`.
    pub(super) fn clear_waiting(&mut self, id: RunnerId) {
        if let Some(runner) = self.runners.get_mut(&id) {
            runner.waiting = None;
        }
    }

    /// Drops a parked HOLD continuation whose future went away.
    pub(super) fn clear_holding(&mut self, id: RunnerId) {
        if let Some(runner) = self.runners.get_mut(&id) {
            runner.holding = None;
        }
    }

    /// A runner deregistered (its iterator was dropped).
    pub(super) fn cancel(&mut self, id: RunnerId) -> Vec<Resumer<()>> {
        if self.runners.remove(&id).is_none() {
            return Vec::new();
        }
        trace!(id, "broadcast runner cancelled");
        self.maybe_finalize()
    }

    /// The owning sequence handle was dropped: latch terminal and resume
    /// every outstanding continuation with clean end.
    #[allow(clippy::type_complexity)]
    pub(super) fn abort(
        &mut self,
    ) -> (
        Vec<(Resumer<WaitOutcome<S::Item>>, WaitOutcome<S::Item>)>,
        Vec<Resumer<()>>,
    ) {
        if self.terminal {
            return (Vec::new(), Vec::new());
        }
        self.latch_terminal();
        self.phase = Phase::Done(Step::End);
        let waiters = self
            .runners
            .values_mut()
            .filter_map(|runner| Some((runner.waiting.take()?, WaitOutcome::Result(Step::End))))
            .collect();
        let holders = self
            .runners
            .values_mut()
            .filter_map(|runner| runner.holding.take())
            .collect();
        trace!("broadcast aborted");
        (waiters, holders)
    }

    fn latch_terminal(&mut self) {
        self.terminal = true;
        if let Some(base) = self.base.take() {
            base.cancel();
        }
        self.history.clear();
    }

    fn ensure_base(&mut self) -> SharedIter<S::Item> {
        match &self.base {
            Some(base) => base.clone(),
            None => {
                let base = SharedIter::new(self.source.make_iter());
                self.base = Some(base.clone());
                base
            }
        }
    }

    /// Advances to the next cycle once nobody is left in the current one.
    fn maybe_finalize(&mut self) -> Vec<Resumer<()>> {
        if self.terminal {
            return Vec::new();
        }
        if self
            .runners
            .values()
            .any(|runner| runner.cycle == self.cycle)
        {
            return Vec::new();
        }
        self.cycle ^= 1;
        self.phase = Phase::Pending;
        trace!(cycle = self.cycle, "cycle finalized");
        if self.runners.is_empty() && self.disposal == DisposalPolicy::WhenTerminatedOrVacant {
            if let Some(base) = self.base.take() {
                base.cancel();
            }
            self.history.clear();
            trace!("vacant: upstream disposed");
        }
        self.runners
            .values_mut()
            .filter_map(|runner| runner.holding.take())
            .collect()
    }
}
