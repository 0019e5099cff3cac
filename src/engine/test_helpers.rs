//! Shared test helpers: a scripted in-memory source and engine construction.

use crate::config::{Config, FetchConfig, RetryConfig};
use crate::db::Database;
use crate::direct_url::DirectUrlResolver;
use crate::engine::IngestEngine;
use crate::error::SourceError;
use crate::source::{
    ChunkStream, MessageQuery, SourceClient, SourceConnector, SourceEntity, SourceResult,
};
use crate::storage::FsObjectStore;
use crate::types::{MediaKind, MediaRef, RawItem};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

/// Plain text item
pub(crate) fn item(id: i64) -> RawItem {
    RawItem {
        id,
        group_id: None,
        text: format!("post {}", id),
        date: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
        views: id * 10,
        media: None,
    }
}

/// Album member with a small photo
pub(crate) fn grouped(id: i64, group_id: i64) -> RawItem {
    RawItem {
        group_id: Some(group_id),
        ..with_media(item(id), 16)
    }
}

/// Attach a JPEG photo of `size` bytes
pub(crate) fn with_media(item: RawItem, size: u64) -> RawItem {
    RawItem {
        media: Some(MediaRef {
            file_id: format!("file-{}", item.id),
            kind: MediaKind::Photo,
            size: Some(size),
            mime_type: Some("image/jpeg".into()),
            width: Some(800),
            height: Some(600),
            duration: None,
        }),
        ..item
    }
}

#[derive(Default)]
struct ScriptState {
    /// Newest first
    items: Vec<RawItem>,
    calls: AtomicUsize,
    call_failures: Mutex<HashMap<usize, SourceError>>,
    queries: Mutex<Vec<MessageQuery>>,
    download_failures: Mutex<HashMap<i64, VecDeque<SourceError>>>,
    downloads: AtomicUsize,
    streams: AtomicUsize,
    unreachable: Mutex<HashSet<String>>,
    connects: Mutex<Vec<Option<String>>>,
    disconnects: AtomicUsize,
}

/// In-memory channel honouring [`MessageQuery`] bounds, with injectable failures
#[derive(Clone, Default)]
pub(crate) struct ScriptedSource {
    state: Arc<ScriptState>,
}

impl ScriptedSource {
    pub(crate) fn new(mut items: Vec<RawItem>) -> Self {
        items.sort_by(|a, b| b.id.cmp(&a.id));
        Self {
            state: Arc::new(ScriptState {
                items,
                ..ScriptState::default()
            }),
        }
    }

    /// Make the `call`-th `get_messages` call (1-based) fail once
    pub(crate) fn fail_call(&self, call: usize, error: SourceError) {
        self.state.call_failures.lock().unwrap().insert(call, error);
    }

    /// Fail the next media transfers of `item_id`, one error per attempt
    pub(crate) fn fail_download(&self, item_id: i64, errors: Vec<SourceError>) {
        self.state
            .download_failures
            .lock()
            .unwrap()
            .insert(item_id, errors.into());
    }

    /// Refuse connections through `proxy`
    pub(crate) fn unreachable_proxy(&self, proxy: &str) {
        self.state.unreachable.lock().unwrap().insert(proxy.to_string());
    }

    pub(crate) fn queries(&self) -> Vec<MessageQuery> {
        self.state.queries.lock().unwrap().clone()
    }

    pub(crate) fn connects(&self) -> Vec<Option<String>> {
        self.state.connects.lock().unwrap().clone()
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub(crate) fn downloads(&self) -> usize {
        self.state.downloads.load(Ordering::SeqCst)
    }

    pub(crate) fn streams(&self) -> usize {
        self.state.streams.load(Ordering::SeqCst)
    }

    pub(crate) fn client(&self) -> ScriptedClient {
        ScriptedClient {
            state: self.state.clone(),
        }
    }

    fn take_download_failure(&self, item_id: i64) -> Option<SourceError> {
        self.state
            .download_failures
            .lock()
            .unwrap()
            .get_mut(&item_id)
            .and_then(|errors| errors.pop_front())
    }
}

#[async_trait]
impl SourceConnector for ScriptedSource {
    async fn connect(&self, proxy: Option<&str>) -> SourceResult<Box<dyn SourceClient>> {
        self.state
            .connects
            .lock()
            .unwrap()
            .push(proxy.map(str::to_string));
        if let Some(proxy) = proxy {
            if self.state.unreachable.lock().unwrap().contains(proxy) {
                return Err(SourceError::Network(format!("proxy {} unreachable", proxy)));
            }
        }
        Ok(Box::new(self.client()))
    }
}

/// Connected handle onto a [`ScriptedSource`]
pub(crate) struct ScriptedClient {
    state: Arc<ScriptState>,
}

impl ScriptedClient {
    fn source(&self) -> ScriptedSource {
        ScriptedSource {
            state: self.state.clone(),
        }
    }

    fn payload(item: &RawItem) -> Bytes {
        let size = item.media.as_ref().and_then(|m| m.size).unwrap_or(16);
        Bytes::from(vec![7u8; size as usize])
    }
}

#[async_trait]
impl SourceClient for ScriptedClient {
    async fn get_entity(&self, source_id: &str) -> SourceResult<SourceEntity> {
        Ok(SourceEntity {
            id: 1,
            title: Some(source_id.to_string()),
        })
    }

    async fn get_messages(&self, _source_id: &str, query: MessageQuery) -> SourceResult<Vec<RawItem>> {
        let call = self.state.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.queries.lock().unwrap().push(query);

        if let Some(error) = self.state.call_failures.lock().unwrap().remove(&call) {
            return Err(error);
        }

        Ok(self
            .state
            .items
            .iter()
            .filter(|i| query.admits(i.id))
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn download_media(&self, _source_id: &str, item: &RawItem) -> SourceResult<Bytes> {
        self.state.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.source().take_download_failure(item.id) {
            return Err(error);
        }
        Ok(Self::payload(item))
    }

    async fn stream_media(
        &self,
        _source_id: &str,
        item: &RawItem,
        chunk_size: usize,
    ) -> SourceResult<ChunkStream> {
        self.state.streams.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.source().take_download_failure(item.id) {
            return Err(error);
        }
        let payload = Self::payload(item);
        let chunks: Vec<SourceResult<Bytes>> = payload
            .chunks(chunk_size.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn disconnect(&self) -> SourceResult<()> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Resolver answering `https://cdn.test/{source_id}/{item_id}` for every item
pub(crate) struct StaticResolver;

#[async_trait]
impl DirectUrlResolver for StaticResolver {
    async fn get_direct_url(&self, source_id: &str, item_id: i64) -> Option<String> {
        Some(format!("https://cdn.test/{}/{}", source_id, item_id))
    }
}

/// Config with pacing disabled and fast retries, rooted in `dir`
pub(crate) fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("test.db");
    config.media.storage_dir = dir.join("media");
    config.fetch = FetchConfig {
        page_size: 10,
        progress_flush_every: 5,
        ..FetchConfig::default().without_pacing()
    };
    config.retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// Engine over `source` with a temp database and object store.
/// Returns the engine and the tempdir (which must be kept alive).
pub(crate) async fn create_test_engine(source: &ScriptedSource) -> (IngestEngine, tempfile::TempDir) {
    create_test_engine_with(source, |_| {}).await
}

/// Like [`create_test_engine`], with a hook to adjust the config
pub(crate) async fn create_test_engine_with(
    source: &ScriptedSource,
    adjust: impl FnOnce(&mut Config),
) -> (IngestEngine, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    adjust(&mut config);

    let db = Database::new(&config.persistence.database_path)
        .await
        .unwrap();
    let store = Arc::new(FsObjectStore::new(&config.media.storage_dir, None));

    let engine = IngestEngine::with_parts(
        config,
        db,
        Arc::new(source.clone()),
        store,
        Arc::new(StaticResolver),
    )
    .await
    .unwrap();

    (engine, temp_dir)
}
