//! # Protocol limits and defaults
//!
//! gRPC implementations reject inbound messages larger than 4 MiB unless the
//! receiver raises its limit. Every `ImageChunk` has to fit into that budget
//! together with its protobuf envelope (`oneof` tag, part number, length
//! prefixes), so the usable payload ceiling sits slightly below it.
//!
//! Small chunks increase per-message overhead, large ones increase the memory
//! held per stream. 1 MiB performs well on local networks; 64 KiB is the
//! commonly recommended value across the WAN.

/// Default maximum size of an inbound gRPC message.
pub const GRPC_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Bytes kept free for the message fields surrounding a chunk's payload.
pub const MESSAGE_ENVELOPE_RESERVE: usize = 1024;

/// Largest chunk payload that is guaranteed to fit in a default-sized gRPC
/// message.
pub const MAX_CHUNK_SIZE: usize = GRPC_MAX_MESSAGE_SIZE - MESSAGE_ENVELOPE_RESERVE;

/// Default chunk payload size.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Version reported by the `Version` RPC.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

const _: () = assert!(DEFAULT_CHUNK_SIZE <= MAX_CHUNK_SIZE);
