//! Process lifecycle supervisor.
//!
//! The [`Supervisor`] spawns a [`Runner`] as an independent task and then
//! waits in a single `select!` loop for either the runner's [`RunOutcome`] or
//! an interrupt. The first interrupt cancels the runner and arms one
//! [`GraceTimer`]; repeated interrupts are logged and ignored. Whichever of
//! the runner and the timer completes the shared [`CompletionSlot`] first
//! decides how the process ends.
//!
//! ```text
//! Idle -> Running -> Terminated                    (runner finished on its own)
//! Idle -> Running -> ShuttingDown -> Terminated    (drained within the window)
//! Idle -> Running -> ShuttingDown -> ForcedExit    (grace window expired)
//! ```
//!
//! The supervisor never exits the process itself. It returns the final
//! [`SupervisorState`] or the fatal [`Error`] and leaves the exit to `main`.

use super::{
    completion::{self, CompletionSlot, RunOutcome},
    interrupt::InterruptSource,
};
use crate::server::{
    error::{Error, Result},
    telemetry::record_shutdown,
};
use core::{future::Future, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The supervised serving activity.
///
/// Implementations serve until `shutdown` is cancelled, then drain and return
/// `Ok(())`. Any other termination is reported as an error. The supervisor's
/// grace timer bounds the drain; runners do not need a timer of their own.
pub trait Runner: Send + 'static {
    fn run(self, shutdown: CancellationToken) -> impl Future<Output = Result<()>> + Send;
}

/// Supervisor states. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SupervisorState {
    Idle,
    Running,
    ShuttingDown,
    Terminated,
    ForcedExit,
}

/// One-shot shutdown deadline.
///
/// Completes the slot with [`RunOutcome::TimedOut`] once `grace` has elapsed.
/// Dropping the timer disarms it.
#[derive(Debug)]
pub struct GraceTimer {
    handle: JoinHandle<()>,
}

impl GraceTimer {
    pub fn arm(grace: Duration, slot: CompletionSlot) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if slot.complete(RunOutcome::TimedOut { grace }) {
                tracing::warn!("Grace window of {grace:?} expired before the server drained");
            }
        });
        Self { handle }
    }
}

impl Drop for GraceTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug)]
pub struct Supervisor {
    grace: Duration,
    state: SupervisorState,
}

impl Supervisor {
    /// Creates a supervisor that allows `grace` for draining after the first
    /// interrupt. The window is fixed for the lifetime of the supervisor.
    pub const fn new(grace: Duration) -> Self {
        Self {
            grace,
            state: SupervisorState::Idle,
        }
    }

    /// Runs `runner` until it finishes or an interrupt shuts it down.
    ///
    /// # Errors
    ///
    /// - The runner's own error, whenever it fails, with or without a prior
    ///   interrupt. No grace timer is armed for a failure before an interrupt.
    /// - [`Error::ShutdownTimeout`] if the runner was still draining when the
    ///   grace window expired.
    pub async fn run<R, I>(mut self, runner: R, mut interrupts: I) -> Result<SupervisorState>
    where
        R: Runner,
        I: InterruptSource,
    {
        let (slot, mut completion) = completion::channel();
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(runner.run(shutdown.clone()));
        let runner_slot = slot.clone();
        tokio::spawn(async move {
            runner_slot.complete(RunOutcome::from_join(handle.await));
        });
        self.transition(SupervisorState::Running);

        // Held until `run` returns; dropping it disarms the deadline.
        let mut _grace_timer: Option<GraceTimer> = None;

        // `slot` lives in this frame, so the receiver can only resolve with a
        // value.
        loop {
            tokio::select! {
                Ok(outcome) = &mut completion => {
                    return self.finish(outcome);
                }
                () = interrupts.recv() => {
                    if let Some(timer) = self.on_interrupt(&shutdown, &slot) {
                        _grace_timer = Some(timer);
                    }
                }
            }
        }
    }

    /// Handles one interrupt. Only the first one while running has an effect.
    ///
    /// Cancellation is issued before the timer is armed.
    fn on_interrupt(
        &mut self,
        shutdown: &CancellationToken,
        slot: &CompletionSlot,
    ) -> Option<GraceTimer> {
        match self.state {
            SupervisorState::Running => {}
            SupervisorState::ShuttingDown => {
                tracing::warn!("Shutdown already in progress, ignoring repeated interrupt");
                return None;
            }
            state => {
                tracing::debug!(?state, "Ignoring interrupt outside of the running state");
                return None;
            }
        }

        self.transition(SupervisorState::ShuttingDown);
        tracing::info!(
            "Shutdown signal received, draining for up to {:?}...",
            self.grace
        );
        shutdown.cancel();
        Some(GraceTimer::arm(self.grace, slot.clone()))
    }

    fn finish(&mut self, outcome: RunOutcome) -> Result<SupervisorState> {
        match outcome {
            RunOutcome::Completed => {
                self.transition(SupervisorState::Terminated);
                record_shutdown("clean");
                Ok(self.state)
            }
            RunOutcome::Failed(err) => {
                self.transition(SupervisorState::Terminated);
                record_shutdown("error");
                Err(err)
            }
            RunOutcome::TimedOut { grace } => {
                self.transition(SupervisorState::ForcedExit);
                record_shutdown("timeout");
                Err(Error::ShutdownTimeout { grace })
            }
        }
    }

    fn transition(&mut self, next: SupervisorState) {
        debug_assert!(
            next > self.state,
            "illegal supervisor transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!(from = ?self.state, to = ?next, "Supervisor state change");
        self.state = next;
    }
}
