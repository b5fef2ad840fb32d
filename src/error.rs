//! Error types surfaced at the crate boundary.
//!
//! Upstream failures travel through sequences as
//! [`Fault`](crate::seq::Fault)s; the types here cover the channel and
//! deadline surfaces, where the caller holds a `Result` rather than a
//! [`Step`](crate::seq::Step).

use thiserror::Error;

/// A `send` found the channel already finished; the element is handed back
/// undelivered.
#[derive(Debug, Error)]
#[error("channel finished before the element was delivered")]
pub struct Closed<T>(pub T);

/// A time-gated operation ran out of time.
#[derive(Debug, Clone, Copy, Error)]
#[error("deadline elapsed")]
pub struct TimedOut;

/// Outcome of racing an operation against a deadline.
///
/// The two flavors keep "the operation failed on its own before the
/// deadline" distinguishable from "the clock won".
#[derive(Debug, Error)]
pub enum DeadlineError<E> {
    /// The operation completed with its own error before the deadline.
    #[error("operation failed before the deadline: {0}")]
    OperationFailed(E),
    /// The deadline elapsed first; the operation was cancelled.
    #[error("operation timed out")]
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_returns_the_element() {
        let Closed(value) = Closed(42);
        assert_eq!(value, 42);
    }

    #[test]
    fn error_display() {
        assert!(!TimedOut.to_string().is_empty());
        let err: DeadlineError<TimedOut> = DeadlineError::OperationFailed(TimedOut);
        assert!(err.to_string().contains("before the deadline"));
    }
}
