//! gRPC service implementation for chunked image streaming.
//!
//! [`DownloaderService`] implements the [`Downloader`] service from the
//! protobuf schema. Each `GetCube` call spawns a background task
//! ([`feed_images`]) that loads the requested images and pushes headers and
//! chunks through a bounded channel, so a slow client applies backpressure
//! to the loader instead of growing memory.
//!
//! Once [`DownloaderService::begin_shutdown`] is called, new streams are
//! rejected with `UNAVAILABLE` while existing ones run to completion.

use super::{store::ImageStore, streaming::feed_images};
use crate::server::{
    config::ServerConfig,
    telemetry::{decrement_streams_inflight, increment_stream_errors, increment_streams_inflight},
};
use core::pin::Pin;
use cubestream_core::{
    ChunkPolicy, Error,
    proto::{
        GetCubeRequest, GetCubeResponse, VersionRequest, VersionResponse,
        downloader_server::Downloader,
    },
    types::SERVER_VERSION,
};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tonic::{Request, Response, Status};
use tracing::Instrument;

#[derive(Debug, Default)]
struct ServiceState {
    shutting_down: AtomicBool,
    streams_inflight: AtomicUsize,
}

/// Decrements the in-flight gauge when a stream's feeding task ends.
struct InflightGuard {
    state: Arc<ServiceState>,
}

impl InflightGuard {
    fn new(state: Arc<ServiceState>) -> Self {
        state.streams_inflight.fetch_add(1, Ordering::Relaxed);
        increment_streams_inflight();
        Self { state }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.state.streams_inflight.fetch_sub(1, Ordering::Relaxed);
        decrement_streams_inflight();
    }
}

/// Streams images from an [`ImageStore`] to gRPC clients.
#[derive(Clone)]
pub struct DownloaderService {
    store: Arc<dyn ImageStore>,
    policy: ChunkPolicy,
    workers: usize,
    stream_buffer_size: usize,
    state: Arc<ServiceState>,
}

impl DownloaderService {
    pub fn new(config: &ServerConfig, store: Arc<dyn ImageStore>) -> Self {
        Self {
            store,
            policy: config.chunk_policy,
            workers: config.workers.get(),
            stream_buffer_size: config.stream_buffer_size,
            state: Arc::default(),
        }
    }

    /// Stops accepting new streams. In-flight streams are left to finish.
    pub fn begin_shutdown(&self) {
        self.state.shutting_down.store(true, Ordering::Release);
    }

    /// Number of streams whose feeding task is still running.
    pub fn streams_inflight(&self) -> usize {
        self.state.streams_inflight.load(Ordering::Relaxed)
    }
}

#[tonic::async_trait]
impl Downloader for DownloaderService {
    type GetCubeStream = Pin<Box<dyn Stream<Item = Result<GetCubeResponse, Status>> + Send>>;

    /// Streams every requested image as a header followed by its chunks.
    #[tracing::instrument(skip_all, fields(images = req.get_ref().images.len()))]
    async fn get_cube(
        &self,
        req: Request<GetCubeRequest>,
    ) -> Result<Response<Self::GetCubeStream>, Status> {
        if self.state.shutting_down.load(Ordering::Acquire) {
            increment_stream_errors();
            return Err(Error::ServiceShutdown.into());
        }

        let images = req.into_inner().images;
        if images.is_empty() {
            increment_stream_errors();
            return Err(Error::InvalidRequest {
                reason: "At least one image must be requested".to_string(),
            }
            .into());
        }
        if images.iter().any(String::is_empty) {
            increment_stream_errors();
            return Err(Error::InvalidRequest {
                reason: "Image names must not be empty".to_string(),
            }
            .into());
        }

        let (resp_tx, resp_rx) =
            mpsc::channel::<Result<GetCubeResponse, Status>>(self.stream_buffer_size);

        let guard = InflightGuard::new(Arc::clone(&self.state));
        let store = Arc::clone(&self.store);
        let policy = self.policy;
        let workers = self.workers;

        let fut = async move {
            let _guard = guard;
            let start = std::time::Instant::now();
            match feed_images(images, store, policy, workers, resp_tx).await {
                Ok(()) => {
                    tracing::debug!("Stream completed in {:?}", start.elapsed());
                }
                Err(e) => {
                    increment_stream_errors();
                    tracing::warn!("Error: {}", e);
                }
            }
        };

        tokio::spawn(fut.instrument(tracing::info_span!("streaming")));

        Ok(Response::new(Box::pin(ReceiverStream::new(resp_rx))))
    }

    async fn version(
        &self,
        _req: Request<VersionRequest>,
    ) -> Result<Response<VersionResponse>, Status> {
        Ok(Response::new(VersionResponse {
            version: SERVER_VERSION.to_string(),
        }))
    }
}
