//! Composable asynchronous sequence operators.
//!
//! A [`Sequence`](seq::Sequence) is a lazy source of typed elements produced
//! over time, iterated through single-use cursors. This crate provides the
//! operators to compose them — and, at its core, the multi-consumer
//! coordinators that arbitrate one upstream producer among many concurrent
//! consumers:
//!
//! ```text
//!                        ┌────────────┐   consumer A
//!   upstream ──────────▶ │ coordinator│──▶ consumer B
//!   (one producer)       │  (1 → N)   │──▶ consumer C
//!                        └────────────┘
//! ```
//!
//! | Coordinator | Discipline |
//! |---|---|
//! | [`broadcast`] | lock-step cycles: the slowest consumer rate-limits the base |
//! | [`share`] | shared buffer with bounded / dropping policies |
//! | [`channel`] | unbuffered rendezvous between senders and receivers |
//! | [`throttle`] | at most one folded emission per clock interval |
//!
//! The pipeline operators (`map`, `filter`, `chain`, `zip`, `merge`,
//! `adjacent_pairs`, `intersperse`, `chunks`, `chunked_by`, `timeout`) live
//! in [`ops`] behind the [`SequenceExt`](ops::SequenceExt) extension trait.
//!
//! ## Concurrency model
//!
//! Coordinators run on the tokio runtime. Each keeps its whole mutable state
//! behind one mutex ([`state::StateCell`]) held across state transitions
//! only, never across a suspension; suspended consumers are represented as
//! one-shot continuations ([`resume`]) captured inside the critical region
//! and resumed outside it. Cancellation is drop-driven: dropping a cursor
//! deregisters its consumer, dropping a coordinator handle aborts the
//! coordinator, and dropping an in-flight `next` future withdraws exactly
//! that suspension.
//!
//! Time never comes from the wall clock directly: the time-gated operators
//! take a [`clock::Clock`], so tests run on tokio's paused clock or on the
//! manual [`clock::TestClock`].
//!
//! ## Example
//!
//! ```
//! use flusso::ops::SequenceExt;
//! use flusso::policy::BufferPolicy;
//! use flusso::seq::{self, SeqIter, Sequence};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let shared = seq::items(vec![1, 2, 3]).share(BufferPolicy::Unbounded);
//! let mut one = shared.make_iter();
//! let mut two = shared.make_iter();
//! assert_eq!(one.next().await.item(), Some(1));
//! assert_eq!(two.next().await.item(), Some(1));
//! # });
//! ```

pub mod broadcast;
pub mod channel;
pub mod clock;
pub mod error;
pub mod ops;
pub mod policy;
pub mod resume;
pub mod seq;
pub mod share;
pub mod state;
pub mod throttle;
pub mod upstream;

pub use broadcast::Broadcast;
pub use channel::Channel;
pub use clock::{Clock, TestClock, TokioClock};
pub use ops::SequenceExt;
pub use policy::{BufferPolicy, DisposalPolicy};
pub use seq::{Fault, SeqIter, Sequence, Step};
pub use share::Share;
pub use throttle::Throttle;
