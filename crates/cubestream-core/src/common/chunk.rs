//! Splitting of image payloads into ordered stream messages.
//!
//! A [`ChunkPolicy`] cuts a payload into consecutive slices of at most
//! `size` bytes. Only the last slice may be shorter. Chunks are cut with
//! [`Bytes::split_to`], so every chunk shares the payload's allocation.

use crate::common::types::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use bytes::Bytes;
use core::num::NonZeroUsize;

const MAX: NonZeroUsize = match NonZeroUsize::new(MAX_CHUNK_SIZE) {
    Some(size) => size,
    None => panic!("MAX_CHUNK_SIZE must be non-zero"),
};

const DEFAULT: NonZeroUsize = match NonZeroUsize::new(DEFAULT_CHUNK_SIZE) {
    Some(size) => size,
    None => panic!("DEFAULT_CHUNK_SIZE must be non-zero"),
};

/// How large payloads are split into `ImageChunk` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    size: NonZeroUsize,
}

impl ChunkPolicy {
    /// Creates a policy emitting chunks of at most `size` bytes.
    ///
    /// Values above [`MAX_CHUNK_SIZE`] are clamped to it; see
    /// [`ChunkPolicy::exceeds_ceiling`] to detect this up front.
    pub const fn new(size: NonZeroUsize) -> Self {
        let size = if size.get() > MAX_CHUNK_SIZE {
            MAX
        } else {
            size
        };
        Self { size }
    }

    /// Returns `true` if `size` would be clamped by [`ChunkPolicy::new`].
    pub const fn exceeds_ceiling(size: NonZeroUsize) -> bool {
        size.get() > MAX_CHUNK_SIZE
    }

    /// Effective chunk size in bytes.
    pub const fn size(&self) -> usize {
        self.size.get()
    }

    /// Number of chunks a payload of `len` bytes is split into.
    pub const fn parts(&self, len: usize) -> usize {
        len.div_ceil(self.size.get())
    }

    /// Splits `payload` into ordered chunks.
    ///
    /// An empty payload yields no chunks.
    pub fn split(&self, payload: Bytes) -> Chunks {
        Chunks {
            payload,
            size: self.size.get(),
        }
    }
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self::new(DEFAULT)
    }
}

/// Iterator over the chunks of one payload, see [`ChunkPolicy::split`].
#[derive(Debug, Clone)]
pub struct Chunks {
    payload: Bytes,
    size: usize,
}

impl Iterator for Chunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        if self.payload.is_empty() {
            return None;
        }
        let take = self.size.min(self.payload.len());
        Some(self.payload.split_to(take))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.payload.len().div_ceil(self.size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks {}

impl core::iter::FusedIterator for Chunks {}
