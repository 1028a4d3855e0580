pub mod transformers;

use crate::boundary::{self, INTERNAL_MESSAGE};
use crate::generated::thumbnail_service_server::ThumbnailService;
use crate::generated::{GetThumbnailRequest, ThumbnailChunk};
use futures::sink;
use shared::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{Instrument, debug, warn};
use youthumb::{CacheEntry, Frame, FrameEncoder, ResourceKey, Resolver, Retriever};

use self::transformers::frame_to_chunk;

/// Chunks buffered ahead of a slow client.
const STREAM_BUFFER: usize = 4;

type ChunkResult = std::result::Result<ThumbnailChunk, Status>;

#[derive(Debug)]
pub struct ThumbnailServer {
    resolver: Resolver,
    retriever: Arc<Retriever>,
    encoder: FrameEncoder,
}

impl ThumbnailServer {
    pub fn new(resolver: Resolver, retriever: Arc<Retriever>, encoder: FrameEncoder) -> Self {
        Self {
            resolver,
            retriever,
            encoder,
        }
    }

    async fn open_stream(
        &self,
        request: GetThumbnailRequest,
    ) -> Result<ReceiverStream<ChunkResult>> {
        // Resolution is pure, so a bad URL never reaches the cache or origin.
        let key = self.resolver.resolve(&request.video_url)?;
        let entry = self.retriever.retrieve(&key).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(stream_frames(self.encoder, entry, tx).in_current_span());

        Ok(ReceiverStream::new(rx))
    }
}

/// Feeds every frame of `entry` into `tx` until done or the client leaves.
async fn stream_frames(encoder: FrameEncoder, entry: CacheEntry, tx: mpsc::Sender<ChunkResult>) {
    let fallback = tx.clone();
    let key = entry.key.clone();

    let pump = async move {
        let mut frames = Box::pin(sink::unfold(tx, |tx, frame: Frame| async move {
            tx.send(Ok(frame_to_chunk(frame))).await.map(|()| tx)
        }));
        encoder.send(&entry, &mut frames).await
    };

    finish_stream(&key, pump, fallback).await;
}

/// Runs `pump` and reports how the stream ended. A panic is surfaced to the
/// client as `Internal` after whatever frames it already has.
async fn finish_stream<F, E>(key: &ResourceKey, pump: F, fallback: mpsc::Sender<ChunkResult>)
where
    F: Future<Output = std::result::Result<usize, E>>,
{
    match boundary::contain("frame stream", pump).await {
        Some(Ok(frames)) => debug!(%key, frames, "thumbnail streamed"),
        Some(Err(_)) => warn!(%key, "client went away, stream aborted"),
        None => {
            // Waits for buffer space so the client never sees a clean end.
            let _ = fallback.send(Err(Status::internal(INTERNAL_MESSAGE))).await;
        }
    }
}

#[tonic::async_trait]
impl ThumbnailService for ThumbnailServer {
    type GetThumbnailStream = ReceiverStream<ChunkResult>;

    async fn get_thumbnail(
        &self,
        request: Request<GetThumbnailRequest>,
    ) -> std::result::Result<Response<Self::GetThumbnailStream>, Status> {
        let stream =
            boundary::guard("GetThumbnail", self.open_stream(request.into_inner())).await?;
        Ok(Response::new(stream))
    }
}
