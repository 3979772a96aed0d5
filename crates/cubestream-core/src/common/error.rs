//! Error types for the downloader service.
//!
//! [`Error`] captures every failure a `GetCube` stream can surface. It
//! implements `From<Error>` for `tonic::Status` so handlers can propagate it
//! with `?` and clients receive a meaningful status code.
//!
//! ## Error Cases
//! - `ChannelError`: the response channel to the client closed mid-stream.
//! - `InvalidRequest`: the request was malformed (empty, bad image name).
//! - `NotFound`: a requested image does not exist.
//! - `Io`: the image exists but could not be read.
//! - `PayloadTooLarge`: an image needs more parts than the protocol can count.
//! - `ServiceShutdown`: the request arrived while the server was draining.

use std::sync::Arc;
use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the downloader service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Internal channel send/receive failure (e.g., the client went away).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The client request was invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The requested image does not exist.
    #[error("Image not found: {name}")]
    NotFound { name: String },

    /// Reading the image failed.
    #[error("Failed to read image {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The image would need more than `u32::MAX` chunks.
    #[error("Image {name} of {size} bytes exceeds the maximum number of parts")]
    PayloadTooLarge { name: String, size: u64 },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Builds an [`Error::Io`] for `name`, keeping `NotFound` distinct.
    pub fn io(name: impl Into<String>, source: std::io::Error) -> Self {
        let name = name.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { name }
        } else {
            Self::Io {
                name,
                source: Arc::new(source),
            }
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {}", context))
            }
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::NotFound { name } => Status::not_found(format!("Image not found: {name}")),
            Error::Io { name, .. } => Status::internal(format!("Failed to read image {name}")),
            e @ Error::PayloadTooLarge { .. } => Status::out_of_range(e.to_string()),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}
