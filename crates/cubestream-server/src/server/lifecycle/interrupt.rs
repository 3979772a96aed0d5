//! Sources of operator stop requests.
//!
//! The supervisor never touches process-wide signal state directly. It waits
//! on an [`InterruptSource`], which production code backs with OS signals and
//! tests back with a channel.

use crate::server::error::{Error, Result};
use core::future::Future;

/// Yields one event per operator stop request.
pub trait InterruptSource: Send {
    /// Resolves when the next interrupt is delivered. May be awaited again for
    /// the following one.
    fn recv(&mut self) -> impl Future<Output = ()> + Send;
}

/// Interrupts delivered by the operating system.
///
/// On Unix, SIGINT and SIGTERM are both treated as the stop request: the
/// former comes from a terminal, the latter from process managers such as
/// systemd or Kubernetes. Elsewhere only Ctrl+C is recognized.
pub struct SignalInterrupt {
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
}

impl SignalInterrupt {
    /// Installs the signal handlers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Startup`] if a handler cannot be registered.
    pub fn install() -> Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let sigint = signal(SignalKind::interrupt())
                .map_err(|e| Error::startup("failed to install SIGINT handler", e))?;
            let sigterm = signal(SignalKind::terminate())
                .map_err(|e| Error::startup("failed to install SIGTERM handler", e))?;
            Ok(Self { sigint, sigterm })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }
}

impl InterruptSource for SignalInterrupt {
    #[cfg(unix)]
    async fn recv(&mut self) {
        tokio::select! {
            Some(()) = self.sigint.recv() => {
                tracing::info!("Received SIGINT signal");
            },
            Some(()) = self.sigterm.recv() => {
                tracing::info!("Received SIGTERM signal");
            },
            else => core::future::pending::<()>().await,
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C signal"),
            Err(e) => {
                tracing::error!("Ctrl+C handler failed: {e}");
                core::future::pending::<()>().await;
            }
        }
    }
}

/// Channel-backed interrupt source.
///
/// Each [`InterruptTrigger::fire`] delivers one interrupt. Once every trigger
/// is dropped the source stays silent forever.
#[cfg(test)]
pub struct ManualInterrupt {
    rx: tokio::sync::mpsc::UnboundedReceiver<()>,
}

#[cfg(test)]
#[derive(Clone)]
pub struct InterruptTrigger {
    tx: tokio::sync::mpsc::UnboundedSender<()>,
}

#[cfg(test)]
impl InterruptTrigger {
    pub fn fire(&self) {
        let _ = self.tx.send(());
    }
}

#[cfg(test)]
pub fn manual() -> (InterruptTrigger, ManualInterrupt) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (InterruptTrigger { tx }, ManualInterrupt { rx })
}

#[cfg(test)]
impl InterruptSource for ManualInterrupt {
    async fn recv(&mut self) {
        if self.rx.recv().await.is_none() {
            core::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn manual_source_delivers_each_trigger() {
        let (trigger, mut source) = manual();
        trigger.fire();
        trigger.fire();

        source.recv().await;
        source.recv().await;
        assert!(
            timeout(Duration::from_secs(1), source.recv()).await.is_err(),
            "no third interrupt was fired"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn manual_source_goes_quiet_when_triggers_drop() {
        let (trigger, mut source) = manual();
        drop(trigger);
        assert!(timeout(Duration::from_secs(60), source.recv()).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn signal_source_installs_handlers() {
        assert!(SignalInterrupt::install().is_ok());
    }
}
