//! Remote message source abstraction
//!
//! The wire protocol of the remote source is not part of this crate. The engine
//! talks to it through [`SourceConnector`] (one connection per job run) and the
//! [`SourceClient`] handle it returns. Implementations must report failures with
//! the tagged [`SourceError`] kinds so the engine can tell throttling, revoked
//! access and transport problems apart.

use crate::error::SourceError;
use crate::types::RawItem;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Result type for source operations
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Stream of media chunks produced by [`SourceClient::stream_media`]
pub type ChunkStream = BoxStream<'static, SourceResult<Bytes>>;

/// Resolved channel identity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntity {
    /// Numeric channel id
    pub id: i64,
    /// Display title, when known
    pub title: Option<String>,
}

/// Page request, paging by item id
///
/// Results are ordered newest to oldest. `offset_id` returns items strictly older
/// than it (0 means start at the newest item). `min_id` and `max_id` are exclusive
/// bounds (0 means unbounded).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageQuery {
    /// Maximum number of items
    pub limit: usize,
    /// Only items with id below this (0 = no bound)
    pub offset_id: i64,
    /// Only items with id above this (0 = no bound)
    pub min_id: i64,
    /// Only items with id below this (0 = no bound)
    pub max_id: i64,
}

impl MessageQuery {
    /// A page of `limit` items older than `offset_id`
    pub fn page(offset_id: i64, limit: usize) -> Self {
        Self {
            limit,
            offset_id,
            ..Self::default()
        }
    }

    /// Items strictly between `min_id` and `max_id`
    pub fn between(min_id: i64, max_id: i64, limit: usize) -> Self {
        Self {
            limit,
            min_id,
            max_id,
            ..Self::default()
        }
    }

    /// Whether `id` satisfies this query's bounds (ignoring `limit`)
    pub fn admits(&self, id: i64) -> bool {
        (self.offset_id == 0 || id < self.offset_id)
            && (self.min_id == 0 || id > self.min_id)
            && (self.max_id == 0 || id < self.max_id)
    }
}

/// Connected handle to the remote source
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Resolve a channel; fails with `NotFound` or `AccessDenied`
    async fn get_entity(&self, source_id: &str) -> SourceResult<SourceEntity>;

    /// Fetch one page of items
    async fn get_messages(&self, source_id: &str, query: MessageQuery) -> SourceResult<Vec<RawItem>>;

    /// Download an item's media into memory
    async fn download_media(&self, source_id: &str, item: &RawItem) -> SourceResult<Bytes>;

    /// Download an item's media as a stream of chunks of at most `chunk_size` bytes
    async fn stream_media(
        &self,
        source_id: &str,
        item: &RawItem,
        chunk_size: usize,
    ) -> SourceResult<ChunkStream>;

    /// Close the connection
    async fn disconnect(&self) -> SourceResult<()>;
}

/// Opens [`SourceClient`] connections, optionally through an egress proxy
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Connect, routing through `proxy` when given
    async fn connect(&self, proxy: Option<&str>) -> SourceResult<Box<dyn SourceClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_query_admits_only_older_items() {
        let q = MessageQuery::page(100, 10);
        assert!(q.admits(99));
        assert!(!q.admits(100));
        assert!(!q.admits(150));

        let newest = MessageQuery::page(0, 10);
        assert!(newest.admits(i64::MAX - 1));
    }

    #[test]
    fn between_query_is_exclusive() {
        let q = MessageQuery::between(40, 51, 10);
        assert!(!q.admits(40));
        assert!(q.admits(41));
        assert!(q.admits(50));
        assert!(!q.admits(51));
    }
}
