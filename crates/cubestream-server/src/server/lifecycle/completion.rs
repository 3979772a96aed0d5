//! Single-slot completion channel shared by the runner and the grace timer.
//!
//! Both producers hold a [`CompletionSlot`]. The first call to
//! [`CompletionSlot::complete`] delivers its [`RunOutcome`] to the
//! supervisor; every later call is a no-op that returns `false`.

use crate::server::error::{Error, Result};
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{sync::oneshot, task::JoinError};

/// Terminal result of one supervised run.
#[derive(Debug)]
pub enum RunOutcome {
    /// The runner stopped cleanly, either on its own or after cancellation.
    Completed,
    /// The runner stopped with an error.
    Failed(Error),
    /// Synthetic outcome injected by the grace timer.
    TimedOut { grace: Duration },
}

impl RunOutcome {
    /// Maps the join result of the runner task to an outcome.
    pub fn from_join(joined: core::result::Result<Result<()>, JoinError>) -> Self {
        match joined {
            Ok(Ok(())) => Self::Completed,
            Ok(Err(err)) => Self::Failed(err),
            Err(err) => Self::Failed(Error::RunnerPanicked(err)),
        }
    }
}

/// Write side of the completion channel. Cheap to clone.
#[derive(Clone, Debug)]
pub struct CompletionSlot {
    tx: Arc<Mutex<Option<oneshot::Sender<RunOutcome>>>>,
}

impl CompletionSlot {
    /// Delivers `outcome` if the slot is still empty.
    ///
    /// Returns `true` if this call won the slot.
    pub fn complete(&self, outcome: RunOutcome) -> bool {
        let Some(tx) = self.tx.lock().take() else {
            tracing::debug!(?outcome, "Discarding late run outcome");
            return false;
        };
        // The receiver may already be gone if the supervisor returned early;
        // the slot is still considered taken.
        let _ = tx.send(outcome);
        true
    }
}

/// Creates a completion slot and the receiver the supervisor waits on.
pub fn channel() -> (CompletionSlot, oneshot::Receiver<RunOutcome>) {
    let (tx, rx) = oneshot::channel();
    (
        CompletionSlot {
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_write_wins() {
        let (slot, rx) = channel();
        let timer = slot.clone();

        assert!(slot.complete(RunOutcome::Completed));
        assert!(!timer.complete(RunOutcome::TimedOut {
            grace: Duration::from_secs(30)
        }));

        assert!(matches!(rx.await, Ok(RunOutcome::Completed)));
    }

    #[tokio::test]
    async fn late_runner_outcome_is_discarded_after_timeout() {
        let (slot, rx) = channel();
        let grace = Duration::from_secs(5);

        assert!(slot.complete(RunOutcome::TimedOut { grace }));
        assert!(!slot.complete(RunOutcome::Completed));

        assert!(matches!(rx.await, Ok(RunOutcome::TimedOut { grace: g }) if g == grace));
    }

    #[tokio::test]
    async fn completing_after_receiver_dropped_still_takes_slot() {
        let (slot, rx) = channel();
        drop(rx);
        assert!(slot.complete(RunOutcome::Completed));
        assert!(!slot.complete(RunOutcome::Completed));
    }

    #[tokio::test]
    async fn join_results_map_to_outcomes() {
        assert!(matches!(RunOutcome::from_join(Ok(Ok(()))), RunOutcome::Completed));
        assert!(matches!(
            RunOutcome::from_join(Ok(Err(Error::config("bad")))),
            RunOutcome::Failed(Error::Config { .. })
        ));

        let panicked = tokio::spawn(async { panic!("boom") }).await;
        assert!(matches!(
            RunOutcome::from_join(panicked.map(|()| Ok(()))),
            RunOutcome::Failed(Error::RunnerPanicked(_))
        ));
    }
}
