//! Resumable one-shot continuations.
//!
//! A coordinator suspends a task by storing the [`Resumer`] half of a
//! [`suspension`] pair in its state and having the task await the
//! [`Suspension`] half. The state machine is the single authority for when a
//! continuation fires: [`Resumer::resume`] consumes the resumer, so a
//! continuation can be resumed at most once by construction.
//!
//! Late resumptions are tolerated: resuming after the suspended side has
//! given up (its future was dropped) is a silent no-op. The reverse — a
//! resumer dropped without firing — surfaces as `None` from
//! [`Suspension::wait`], which callers map to a clean end.

use tokio::sync::oneshot;

/// Creates a linked resumer/suspension pair.
pub fn suspension<T>() -> (Resumer<T>, Suspension<T>) {
    let (tx, rx) = oneshot::channel();
    (Resumer { tx }, Suspension { rx })
}

/// The resuming half of a one-shot continuation.
#[derive(Debug)]
pub struct Resumer<T> {
    tx: oneshot::Sender<T>,
}

impl<T> Resumer<T> {
    /// Fires the continuation with `value`.
    ///
    /// No-op if the suspended side already went away.
    pub fn resume(self, value: T) {
        let _ = self.tx.send(value);
    }

    /// Fires the continuation, handing `value` back if the suspended side
    /// already went away.
    ///
    /// Used where an undelivered value must survive the miss (e.g. the shared
    /// upstream adapter re-parks a response its requester abandoned).
    pub fn try_resume(self, value: T) -> Result<(), T> {
        self.tx.send(value)
    }
}

/// The suspended half of a one-shot continuation.
#[derive(Debug)]
pub struct Suspension<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Suspension<T> {
    /// Waits for the continuation to fire.
    ///
    /// `None` means the resumer was dropped without firing, which only
    /// happens when the owning coordinator was torn down.
    pub async fn wait(self) -> Option<T> {
        self.rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resumes_with_the_value() {
        let (resumer, suspended) = suspension();
        resumer.resume(7);
        assert_eq!(suspended.wait().await, Some(7));
    }

    #[tokio::test]
    async fn dropped_resumer_yields_none() {
        let (resumer, suspended) = suspension::<u8>();
        drop(resumer);
        assert_eq!(suspended.wait().await, None);
    }

    /// Resuming after the suspended side is gone must not panic.
    #[tokio::test]
    async fn late_resume_is_a_no_op() {
        let (resumer, suspended) = suspension();
        drop(suspended);
        resumer.resume(7);
    }
}
