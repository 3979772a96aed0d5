//! Lifecycle errors of the downloader process.
//!
//! Every variant is fatal. The supervisor returns them to `main`, which logs
//! the error and exits with a non-zero status; nothing is retried.
//!
//! A graceful stop requested by the supervisor is not an error: the runner
//! reports it as `Ok(())`.

use core::time::Duration;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid process configuration, detected before anything is started.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// A dependency could not be initialized (signal handlers, TLS files).
    #[error("startup failed: {context}")]
    Startup {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The listen address could not be bound.
    #[error("failed to bind {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The TLS identity was rejected by the transport.
    #[error("invalid TLS configuration")]
    Tls(#[source] tonic::transport::Error),

    /// The reflection service could not be built from the descriptor set.
    #[error("failed to build reflection service")]
    Reflection(#[from] tonic_reflection::server::Error),

    /// The server stopped for any reason other than a requested shutdown.
    #[error("server terminated unexpectedly")]
    Serve(#[source] tonic::transport::Error),

    /// The runner task panicked or was aborted.
    #[error("runner task failed")]
    RunnerPanicked(#[source] tokio::task::JoinError),

    /// The runner did not finish draining within the grace window.
    #[error("did not terminate within {grace:?} of the shutdown request")]
    ShutdownTimeout { grace: Duration },
}

impl Error {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn startup(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Startup {
            context: context.into(),
            source,
        }
    }
}
