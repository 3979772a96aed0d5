/// Builds the gRPC client and server code for the `cubestream.proto`
/// definition using `tonic-prost-build`.
///
/// # Byte Field Optimization
///
/// The `data` field in the `ImageChunk` message is explicitly marked with
/// `.bytes(...)` so it is generated as `Bytes` rather than `Vec<u8>`. Chunks
/// are produced by slicing one shared image buffer, so this keeps the server
/// side zero-copy.
///
/// # Files and Paths
///
/// - Proto file: `proto/cubestream.proto`
/// - Includes: `proto/`
/// - Descriptor set: `$OUT_DIR/cubestream_descriptor.bin` (served through
///   gRPC reflection)
///
/// # Panics
///
/// Panics if code generation fails, which aborts the build with the
/// underlying `protoc` diagnostic.
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("cubestream_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    config
        .bytes([".cubestream.ImageChunk.data"])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/cubestream.proto"], &["proto"])
        .unwrap();
}
