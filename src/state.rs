//! Scoped mutual exclusion over a state value.
//!
//! Every coordinator in this crate keeps its entire mutable state behind one
//! [`StateCell`] and drives it exclusively through [`StateCell::with`]: lock,
//! transition, unlock. The closure shape makes it impossible to hold the lock
//! across a suspension point, and the guard releases on every exit path,
//! panics included.
//!
//! Continuations ([`Resumer`](crate::resume::Resumer)s) are *captured* inside
//! the critical region and *resumed* outside it; `with` callers return the
//! resumers they collected and fire them after the closure has unlocked.

use std::sync::Mutex;

/// A value guarded by a mutex that can only be accessed in a scoped critical
/// region.
#[derive(Debug, Default)]
pub struct StateCell<S> {
    state: Mutex<S>,
}

impl<S> StateCell<S> {
    /// Wraps `state`.
    pub fn new(state: S) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Runs `critical` with exclusive access to the state.
    ///
    /// A panic inside an earlier critical region does not wedge the cell: the
    /// poison flag is ignored and the state is handed out as-is.
    pub fn with<R>(&self, critical: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        critical(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_returns_the_closure_result() {
        let cell = StateCell::new(41);
        let out = cell.with(|state| {
            *state += 1;
            *state
        });
        assert_eq!(out, 42);
    }

    /// A panicking critical region must not block later ones.
    #[test]
    fn survives_poisoning() {
        use std::panic::{AssertUnwindSafe, catch_unwind};
        use std::sync::Arc;

        let cell = Arc::new(StateCell::new(0));
        let poisoner = cell.clone();
        let _ = catch_unwind(AssertUnwindSafe(move || {
            poisoner.with(|_| panic!("mid-transition"));
        }));
        assert_eq!(cell.with(|state| *state), 0);
    }
}
