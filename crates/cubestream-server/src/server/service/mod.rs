//! gRPC service implementation and image feeding.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`DownloaderService`).
//! - [`streaming`] - per-request task turning images into headers and chunks.
//! - [`store`] - where image payloads come from.

pub mod handler;
pub mod store;
pub mod streaming;
