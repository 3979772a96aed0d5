#![doc = include_str!("../README.md")]

mod common;
pub use common::*;

/// gRPC service and message definitions generated from
/// `proto/cubestream.proto`.
///
/// ## Service
///
/// - `GetCube` - streams each requested image as an [`proto::ImageHeader`]
///   followed by its ordered [`proto::ImageChunk`]s.
/// - `Version` - reports the server version.
///
/// ## Invariants
///
/// - `ImageHeader.nb_parts == ceil(ImageHeader.size / chunk_size)`
/// - Chunks of one image carry `part = 0..nb_parts` in order, and every chunk
///   but the last is exactly `chunk_size` bytes long.
pub mod proto {
    tonic::include_proto!("cubestream");

    /// Encoded file descriptor set for gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("cubestream_descriptor");
}
