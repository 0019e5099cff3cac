//! Object storage for media payloads
//!
//! [`ObjectStore`] is the upload seam used by the media dispatcher. The crate ships
//! [`FsObjectStore`], which writes objects below a root directory.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Stream of chunks handed to [`ObjectStore::put_stream`]
pub type UploadStream = BoxStream<'static, Result<Bytes>>;

/// Destination for media objects
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a whole object and return its URL
    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> Result<String>;

    /// Store an object chunk by chunk and return its URL
    ///
    /// Implementations must pull the next chunk only after the previous one was
    /// written, so the producer is held back by the writer.
    async fn put_stream(
        &self,
        key: &str,
        chunks: UploadStream,
        content_type: Option<&str>,
    ) -> Result<String>;
}

/// Filesystem-backed object store
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl FsObjectStore {
    /// Store objects below `root`; URLs are `{public_base_url}/{key}` when a base is
    /// given, `file://` paths otherwise
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.map(|b| b.trim_end_matches('/').to_string()),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(Error::Storage(format!("invalid object key: {}", key)));
        }
        Ok(self.root.join(relative))
    }

    fn url_for(&self, key: &str, path: &Path) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base, key),
            None => format!("file://{}", path.display()),
        }
    }

    async fn prepare(&self, key: &str) -> Result<(PathBuf, PathBuf)> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut partial = path.clone().into_os_string();
        partial.push(".part");
        Ok((path, PathBuf::from(partial)))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, data: Bytes, _content_type: Option<&str>) -> Result<String> {
        let (path, partial) = self.prepare(key).await?;
        tokio::fs::write(&partial, &data).await?;
        tokio::fs::rename(&partial, &path).await?;

        tracing::debug!(key, bytes = data.len(), "Stored object");
        Ok(self.url_for(key, &path))
    }

    async fn put_stream(
        &self,
        key: &str,
        mut chunks: UploadStream,
        _content_type: Option<&str>,
    ) -> Result<String> {
        let (path, partial) = self.prepare(key).await?;
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written = 0u64;

        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(e);
                }
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, &path).await?;

        tracing::debug!(key, bytes = written, "Stored streamed object");
        Ok(self.url_for(key, &path))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;

    #[tokio::test]
    async fn put_writes_file_and_returns_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), Some("https://media.example/".into()));

        let url = store
            .put("news/42.jpg", Bytes::from_static(b"jpeg"), Some("image/jpeg"))
            .await
            .unwrap();

        assert_eq!(url, "https://media.example/news/42.jpg");
        let stored = tokio::fs::read(dir.path().join("news/42.jpg")).await.unwrap();
        assert_eq!(stored, b"jpeg");
    }

    #[tokio::test]
    async fn put_without_base_returns_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), None);

        let url = store.put("a/b.bin", Bytes::from_static(b"x"), None).await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("a/b.bin"));
    }

    #[tokio::test]
    async fn put_stream_concatenates_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), None);

        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ])
        .boxed();
        store.put_stream("v/1.mp4", chunks, None).await.unwrap();

        let stored = tokio::fs::read(dir.path().join("v/1.mp4")).await.unwrap();
        assert_eq!(stored, b"hello world");
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), None);

        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(Error::Source(SourceError::Network("reset".into()))),
        ])
        .boxed();
        assert!(store.put_stream("v/2.mp4", chunks, None).await.is_err());

        assert!(!dir.path().join("v/2.mp4").exists());
        assert!(!dir.path().join("v/2.mp4.part").exists());
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), None);

        for key in ["../evil", "/abs/path", "", "a/../../b"] {
            let result = store.put(key, Bytes::new(), None).await;
            assert!(matches!(result, Err(Error::Storage(_))), "{key} should be rejected");
        }
    }
}
