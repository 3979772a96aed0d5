pub mod chunk;
pub mod error;
pub mod types;

pub use chunk::{ChunkPolicy, Chunks};
pub use error::{Error, Result};
