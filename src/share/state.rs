//! Cursor-and-buffer state machine for the buffered share.
//!
//! Elements carry their absolute upstream index; each side (consumer) keeps a
//! `position` — the index of the next element it wants. The buffer holds the
//! retained elements no side has consumed yet and is trimmed whenever the
//! minimum position advances. Drop policies may punch elements out of the
//! buffer; positions skip over the holes.
//!
//! A side that has caught up parks a continuation. The pull task delivers a
//! fresh element to every parked side directly and buffers it for the
//! laggards, subject to the policy cap.

use std::collections::HashMap;
use std::collections::VecDeque;

use tracing::trace;

use crate::policy::BufferPolicy;
use crate::resume::{Resumer, Suspension, suspension};
use crate::seq::{Fault, Step};

pub(super) type SideId = u64;

/// Pull-task lifecycle: `Pending → Starting → Running → Stopped`.
pub(super) enum PullTask {
    Pending,
    Starting,
    Running(tokio::task::JoinHandle<()>),
    Stopped,
}

struct Side<T> {
    /// Absolute index of the next element this side wants.
    position: u64,
    parked: Option<Resumer<Step<T>>>,
    /// The side consumed the terminal failure; only clean end remains.
    fault_seen: bool,
}

enum TerminalKind {
    End,
    Failed(Fault),
}

struct Terminal {
    /// Absolute index at which the terminal event applies.
    at: u64,
    kind: TerminalKind,
}

pub(super) struct ShareState<T> {
    /// Retained elements, each tagged with its absolute index. Ascending.
    buffer: VecDeque<(u64, T)>,
    /// Count of elements emitted by the upstream so far.
    emitted: u64,
    sides: HashMap<SideId, Side<T>>,
    next_id: SideId,
    policy: BufferPolicy,
    pub(super) task: PullTask,
    /// Pull task parked until some side has outstanding demand.
    demand: Option<Resumer<()>>,
    /// Pull task parked until the bounded buffer has space.
    space: Option<Resumer<()>>,
    terminal: Option<Terminal>,
    cancelled: bool,
}

/// Outcome of a side's `next` request.
pub(super) enum NextAction<T> {
    /// Step ready now, plus a possible space continuation to fire.
    Ready(Step<T>, Option<Resumer<()>>),
    /// Caught up: park, after waking the pull task's demand gate.
    Suspend(Suspension<Step<T>>, Option<Resumer<()>>),
}

/// Outcome of a pull-task gate check.
pub(super) enum Gate {
    Go,
    Park(Suspension<()>),
    Exit,
}

impl<T: Clone> ShareState<T> {
    pub(super) fn new(policy: BufferPolicy) -> Self {
        Self {
            buffer: VecDeque::new(),
            emitted: 0,
            sides: HashMap::new(),
            next_id: 0,
            policy,
            task: PullTask::Pending,
            demand: None,
            space: None,
            terminal: None,
            cancelled: false,
        }
    }

    pub(super) fn register(&mut self) -> SideId {
        let id = self.next_id;
        self.next_id += 1;
        // a new side replays whatever is still buffered
        let position = self
            .buffer
            .front()
            .map(|(index, _)| *index)
            .unwrap_or(self.emitted);
        self.sides.insert(
            id,
            Side {
                position,
                parked: None,
                fault_seen: false,
            },
        );
        trace!(id, position, "share side registered");
        id
    }

    pub(super) fn unregister(&mut self, id: SideId) -> Option<Resumer<()>> {
        if self.sides.remove(&id).is_none() {
            return None;
        }
        trace!(id, "share side unregistered");
        self.trim()
    }

    pub(super) fn on_next(&mut self, id: SideId) -> NextAction<T> {
        if self.cancelled {
            return NextAction::Ready(Step::End, None);
        }
        let Some(side) = self.sides.get_mut(&id) else {
            return NextAction::Ready(Step::End, None);
        };
        if side.fault_seen {
            return NextAction::Ready(Step::End, None);
        }
        let position = side.position;
        let buffered = self
            .buffer
            .iter()
            .find(|(index, _)| *index >= position)
            .map(|(index, item)| (*index, item.clone()));
        if let Some((index, item)) = buffered {
            self.sides
                .get_mut(&id)
                .expect("side checked above")
                .position = index + 1;
            let space = self.trim();
            return NextAction::Ready(Step::Item(item), space);
        }
        if let Some(terminal) = &self.terminal {
            let step = match &terminal.kind {
                TerminalKind::End => Step::End,
                TerminalKind::Failed(fault) => {
                    let fault = fault.clone();
                    let side = self.sides.get_mut(&id).expect("side checked above");
                    side.fault_seen = true;
                    Step::Failed(fault)
                }
            };
            return NextAction::Ready(step, None);
        }
        let (resumer, suspended) = suspension();
        let side = self.sides.get_mut(&id).expect("side checked above");
        side.parked = Some(resumer);
        NextAction::Suspend(suspended, self.demand.take())
    }

    pub(super) fn clear_parked(&mut self, id: SideId) {
        if let Some(side) = self.sides.get_mut(&id) {
            side.parked = None;
        }
    }

    // ---- pull-task side ----

    pub(super) fn space_gate(&mut self) -> Gate {
        if self.cancelled {
            return Gate::Exit;
        }
        let BufferPolicy::Bounded(bound) = self.policy else {
            return Gate::Go;
        };
        if self.buffer.len() < bound {
            return Gate::Go;
        }
        let (resumer, suspended) = suspension();
        self.space = Some(resumer);
        Gate::Park(suspended)
    }

    pub(super) fn demand_gate(&mut self) -> Gate {
        if self.cancelled {
            return Gate::Exit;
        }
        if self.sides.values().any(|side| side.parked.is_some()) {
            return Gate::Go;
        }
        let (resumer, suspended) = suspension();
        self.demand = Some(resumer);
        Gate::Park(suspended)
    }

    /// Publishes one upstream step. Returns the parked-side continuations to
    /// fire (with their steps) and whether the pull task should exit.
    pub(super) fn emit(&mut self, step: Step<T>) -> (Vec<(Resumer<Step<T>>, Step<T>)>, bool) {
        if self.cancelled {
            return (Vec::new(), true);
        }
        match step {
            Step::Item(item) => {
                let index = self.emitted;
                self.emitted += 1;
                // parked sides take the element directly
                let deliveries: Vec<_> = self
                    .sides
                    .values_mut()
                    .filter_map(|side| {
                        let resumer = side.parked.take()?;
                        side.position = index + 1;
                        Some((resumer, Step::Item(item.clone())))
                    })
                    .collect();
                // laggards read it from the buffer, policy permitting
                self.buffer.push_back((index, item));
                let _ = self.trim();
                match self.policy {
                    BufferPolicy::BufferingOldest(bound) if self.buffer.len() > bound => {
                        self.buffer.pop_back();
                        trace!(index, "newest element dropped");
                    }
                    BufferPolicy::BufferingNewest(bound) if self.buffer.len() > bound => {
                        if let Some((dropped, _)) = self.buffer.pop_front() {
                            trace!(index = dropped, "oldest element dropped");
                        }
                    }
                    _ => {}
                }
                (deliveries, false)
            }
            Step::End => {
                self.terminal = Some(Terminal {
                    at: self.emitted,
                    kind: TerminalKind::End,
                });
                let deliveries = self
                    .sides
                    .values_mut()
                    .filter_map(|side| Some((side.parked.take()?, Step::End)))
                    .collect();
                self.task = PullTask::Stopped;
                trace!("share upstream ended");
                (deliveries, true)
            }
            Step::Failed(fault) => {
                self.terminal = Some(Terminal {
                    at: self.emitted,
                    kind: TerminalKind::Failed(fault.clone()),
                });
                let deliveries = self
                    .sides
                    .values_mut()
                    .filter_map(|side| {
                        let resumer = side.parked.take()?;
                        side.fault_seen = true;
                        Some((resumer, Step::Failed(fault.clone())))
                    })
                    .collect();
                self.task = PullTask::Stopped;
                trace!("share upstream failed");
                (deliveries, true)
            }
        }
    }

    /// Latches cancellation; everything parked resolves with clean end.
    #[allow(clippy::type_complexity)]
    pub(super) fn abort(
        &mut self,
    ) -> (
        Vec<(Resumer<Step<T>>, Step<T>)>,
        Option<Resumer<()>>,
        Option<Resumer<()>>,
        Option<tokio::task::JoinHandle<()>>,
    ) {
        if self.cancelled {
            return (Vec::new(), None, None, None);
        }
        self.cancelled = true;
        self.buffer.clear();
        let deliveries = self
            .sides
            .values_mut()
            .filter_map(|side| Some((side.parked.take()?, Step::End)))
            .collect();
        let handle = match std::mem::replace(&mut self.task, PullTask::Stopped) {
            PullTask::Running(handle) => Some(handle),
            PullTask::Pending | PullTask::Starting | PullTask::Stopped => None,
        };
        trace!("share aborted");
        (deliveries, self.demand.take(), self.space.take(), handle)
    }

    /// Drops buffered elements every live side has consumed. Returns the
    /// space continuation if the bounded buffer regained room.
    fn trim(&mut self) -> Option<Resumer<()>> {
        let min_position = self.sides.values().map(|side| side.position).min();
        if let Some(min_position) = min_position {
            while let Some((index, _)) = self.buffer.front() {
                if *index < min_position {
                    self.buffer.pop_front();
                } else {
                    break;
                }
            }
        }
        match self.policy {
            BufferPolicy::Bounded(bound) if self.buffer.len() < bound => self.space.take(),
            _ => None,
        }
    }
}
