use super::store::ImageStore;
use crate::server::telemetry::record_image_streamed;
use cubestream_core::{
    ChunkPolicy, Error,
    proto::{GetCubeResponse, ImageChunk, ImageHeader, get_cube_response::Response},
};
use futures::{StreamExt, stream};
use std::sync::Arc;
use tokio::sync::mpsc;
use tonic::Status;

/// Streams every image in `images` to `resp_tx`, in request order.
///
/// Up to `workers` images are loaded concurrently; `buffered` keeps their
/// results in request order. Each image is sent as one [`ImageHeader`]
/// followed by its chunks as cut by `policy`.
///
/// A failed load is forwarded to the client (best effort) and ends the
/// stream. If the client goes away, sending fails and the function returns
/// early; the remaining loads are dropped.
pub async fn feed_images(
    images: Vec<String>,
    store: Arc<dyn ImageStore>,
    policy: ChunkPolicy,
    workers: usize,
    resp_tx: mpsc::Sender<Result<GetCubeResponse, Status>>,
) -> cubestream_core::Result<()> {
    let mut loads = stream::iter(images)
        .map(|name| {
            let store = Arc::clone(&store);
            async move {
                let loaded = store.load(&name).await;
                (name, loaded)
            }
        })
        .buffered(workers);

    while let Some((name, loaded)) = loads.next().await {
        let payload = match loaded {
            Ok(payload) => payload,
            Err(err) => {
                // The client may already be gone, in which case only the
                // original error is reported upstream.
                if let Err(e) = resp_tx.send(Err(err.clone().into())).await {
                    tracing::warn!("Failed to forward err: {}", e);
                }
                return Err(err);
            }
        };

        let size = payload.len() as u64;
        let nb_parts = u32::try_from(policy.parts(payload.len())).map_err(|_| {
            Error::PayloadTooLarge {
                name: name.clone(),
                size,
            }
        })?;

        send(
            &resp_tx,
            Response::Header(ImageHeader {
                name,
                size,
                nb_parts,
            }),
        )
        .await?;

        for (part, data) in (0_u32..).zip(policy.split(payload)) {
            send(&resp_tx, Response::Chunk(ImageChunk { part, data })).await?;
        }

        record_image_streamed(size);
    }

    Ok(())
}

async fn send(
    resp_tx: &mpsc::Sender<Result<GetCubeResponse, Status>>,
    response: Response,
) -> cubestream_core::Result<()> {
    resp_tx
        .send(Ok(GetCubeResponse {
            response: Some(response),
        }))
        .await
        .map_err(|e| Error::ChannelError {
            context: format!("Failed to forward response: {e}"),
        })
}
