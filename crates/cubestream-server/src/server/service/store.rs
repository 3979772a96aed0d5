//! Image sources for the downloader.
//!
//! [`ImageStore`] is the seam to the business logic that produces image
//! payloads. [`DirectoryStore`] serves files below a root directory.

use bytes::Bytes;
use cubestream_core::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Loads image payloads by name.
#[tonic::async_trait]
pub trait ImageStore: Send + Sync + 'static {
    /// Loads the full payload of `name`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `name` is not acceptable.
    /// - [`Error::NotFound`] if no such image exists.
    /// - [`Error::Io`] if the image could not be read.
    async fn load(&self, name: &str) -> Result<Bytes>;
}

/// Serves the files below `root`. Image names are relative paths.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves `name` below the root, refusing anything that could escape it.
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let mut components = relative.components().peekable();
        if components.peek().is_none() {
            return Err(Error::InvalidRequest {
                reason: "Image name must not be empty".to_string(),
            });
        }
        if !components.all(|c| matches!(c, Component::Normal(_))) {
            return Err(Error::InvalidRequest {
                reason: format!("Image name {name:?} must be a relative path without '..'"),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[tonic::async_trait]
impl ImageStore for DirectoryStore {
    async fn load(&self, name: &str) -> Result<Bytes> {
        let path = self.resolve(name)?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::io(name, e))?;
        Ok(Bytes::from(data))
    }
}
