//! Media upload strategy
//!
//! Small payloads are downloaded whole and uploaded in one call. Payloads at or
//! above the threshold are piped from the source to the object store through a
//! channel of capacity one: the download side waits whenever the upload side has
//! not taken the previous chunk, so memory use stays bounded by the chunk size.

use crate::config::MediaConfig;
use crate::error::{Error, Result};
use crate::source::{ChunkStream, SourceClient};
use crate::storage::ObjectStore;
use crate::types::RawItem;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// How a media payload is moved to storage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Download fully, then upload in one call
    Buffered,
    /// Pipe chunks from download to upload with backpressure
    Streamed,
}

/// Result of a media upload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMedia {
    /// URL returned by the object store
    pub url: String,
    /// Strategy used
    pub mode: DispatchMode,
    /// Bytes moved
    pub bytes: u64,
}

/// Chooses and runs the upload strategy for one media item
#[derive(Clone, Copy, Debug)]
pub struct MediaDispatchPolicy {
    threshold: u64,
    chunk_size: usize,
}

impl MediaDispatchPolicy {
    /// Policy with an explicit threshold and stream chunk size
    pub fn new(threshold: u64, chunk_size: usize) -> Self {
        Self {
            threshold,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Policy from the `media` config section
    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(config.stream_threshold, config.chunk_size)
    }

    /// Sizes at or above the threshold stream; smaller or unknown sizes buffer
    pub fn choose(&self, byte_size: Option<u64>) -> DispatchMode {
        match byte_size {
            Some(size) if size >= self.threshold => DispatchMode::Streamed,
            _ => DispatchMode::Buffered,
        }
    }

    /// Move `item`'s media from the source to `store` under `key`
    pub async fn dispatch(
        &self,
        client: &dyn SourceClient,
        store: &dyn ObjectStore,
        source_id: &str,
        item: &RawItem,
        key: &str,
    ) -> Result<StoredMedia> {
        let media = item.media.as_ref().ok_or_else(|| {
            Error::Other(format!("item {} has no media to dispatch", item.id))
        })?;
        let content_type = media.mime_type.as_deref();
        let mode = self.choose(media.size);

        tracing::debug!(item_id = item.id, size = ?media.size, ?mode, "Dispatching media");

        match mode {
            DispatchMode::Buffered => {
                let data = client.download_media(source_id, item).await?;
                let bytes = data.len() as u64;
                let url = store.put(key, data, content_type).await?;
                Ok(StoredMedia { url, mode, bytes })
            }
            DispatchMode::Streamed => {
                let chunks = client
                    .stream_media(source_id, item, self.chunk_size)
                    .await?;
                let (url, bytes) = pipe_stream(chunks, store, key, content_type).await?;
                Ok(StoredMedia { url, mode, bytes })
            }
        }
    }
}

/// Pipe source chunks into `store` through a single-slot channel
///
/// Producer and consumer run concurrently on the current task. The producer pulls
/// the next chunk only after the previous one was accepted, so at most one chunk
/// waits in the channel and one in the producer's hands.
pub async fn pipe_stream(
    mut chunks: ChunkStream,
    store: &dyn ObjectStore,
    key: &str,
    content_type: Option<&str>,
) -> Result<(String, u64)> {
    let (tx, rx) = mpsc::channel::<Result<bytes::Bytes>>(1);

    let producer = async move {
        let mut total = 0u64;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(Error::Source);
            let failed = chunk.is_err();
            if let Ok(data) = &chunk {
                total += data.len() as u64;
            }
            // Consumer hung up: it already has its error
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
        total
    };

    let consumer = store.put_stream(key, ReceiverStream::new(rx).boxed(), content_type);

    let (total, url) = tokio::join!(producer, consumer);
    Ok((url?, total))
}

/// Object key for an item's media: `{source_id}/{item_id}.{ext}`
pub fn object_key(source_id: &str, item: &RawItem) -> String {
    let ext = item.media.as_ref().map(|m| m.extension()).unwrap_or("bin");
    format!("{}/{}.{}", source_id, item.id, ext)
}
