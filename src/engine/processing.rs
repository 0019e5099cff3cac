//! Turning fetched items into stored posts and media rows.

use crate::config::RetryConfig;
use crate::db::{Database, NewMedia, NewPost};
use crate::direct_url::DirectUrlResolver;
use crate::error::Result;
use crate::media::{MediaDispatchPolicy, object_key};
use crate::retry::with_retry;
use crate::source::SourceClient;
use crate::storage::ObjectStore;
use crate::types::{Album, JobId, RawItem};
use std::collections::BTreeMap;

/// Phrases that mark a post as organic content
const ORGANIC_MARKERS: &[&str] = &["координаты", "место на карте"];

/// Posts with text are treated as advertising unless they carry a location marker
pub fn is_advertising(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    let lower = text.to_lowercase();
    !ORGANIC_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// One stored post: a standalone item or a whole album
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PostUnit {
    Single(RawItem),
    Album(Album),
}

impl PostUnit {
    /// Item whose text, date and views represent the post
    pub(crate) fn lead(&self) -> Option<&RawItem> {
        match self {
            PostUnit::Single(item) => Some(item),
            PostUnit::Album(album) => album.lead(),
        }
    }

    /// Items contributing media, in album order
    pub(crate) fn items(&self) -> &[RawItem] {
        match self {
            PostUnit::Single(item) => std::slice::from_ref(item),
            PostUnit::Album(album) => &album.items,
        }
    }
}

/// Merge, de-duplicate and order items, then split them into posts
///
/// Posts come out oldest first. Album members are ordered by ascending id.
pub(crate) fn assemble(fetched: Vec<RawItem>, recovered: Vec<RawItem>) -> Vec<PostUnit> {
    let mut by_id: BTreeMap<i64, RawItem> = BTreeMap::new();
    for item in fetched.into_iter().chain(recovered) {
        by_id.entry(item.id).or_insert(item);
    }

    let mut units: Vec<PostUnit> = Vec::new();
    let mut album_index: BTreeMap<i64, usize> = BTreeMap::new();
    for item in by_id.into_values() {
        match item.group_id {
            None => units.push(PostUnit::Single(item)),
            Some(group_id) => match album_index.get(&group_id) {
                Some(&index) => {
                    if let PostUnit::Album(album) = &mut units[index] {
                        album.items.push(item);
                    }
                }
                None => {
                    album_index.insert(group_id, units.len());
                    units.push(PostUnit::Album(Album {
                        group_id,
                        items: vec![item],
                    }));
                }
            },
        }
    }
    units
}

/// What processing one post produced
#[derive(Debug, Default)]
pub(crate) struct UnitOutcome {
    pub(crate) media_saved: u64,
    pub(crate) failures: Vec<String>,
}

/// Stores posts and their media for one job
pub(crate) struct PostWriter<'a> {
    pub(crate) db: &'a Database,
    pub(crate) client: &'a dyn SourceClient,
    pub(crate) store: &'a dyn ObjectStore,
    pub(crate) resolver: Option<&'a dyn DirectUrlResolver>,
    pub(crate) policy: MediaDispatchPolicy,
    pub(crate) retry: &'a RetryConfig,
    pub(crate) job_id: &'a JobId,
    pub(crate) source_id: &'a str,
    pub(crate) download_media: bool,
}

impl PostWriter<'_> {
    /// Store one post and each of its media items
    ///
    /// Failures are isolated: a media item that cannot be uploaded or saved is
    /// reported in the outcome and the remaining items are still processed.
    pub(crate) async fn write(&self, unit: &PostUnit) -> UnitOutcome {
        let mut outcome = UnitOutcome::default();
        let Some(lead) = unit.lead() else {
            return outcome;
        };

        let post = NewPost {
            source_id: self.source_id.to_string(),
            item_id: lead.id,
            group_id: lead.group_id,
            text: lead.text.clone(),
            date: lead.date,
            views: lead.views,
            is_ad: is_advertising(&lead.text),
            job_id: self.job_id.clone(),
        };
        let post_id = match self.db.save_post(&post).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(job_id = %self.job_id, item_id = lead.id, error = %e, "Failed to save post");
                outcome
                    .failures
                    .push(format!("item {}: failed to save post: {}", lead.id, e));
                return outcome;
            }
        };

        let mut media_order = 0i64;
        for item in unit.items() {
            if item.media.is_none() {
                continue;
            }
            match self.write_media(post_id, item, media_order).await {
                Ok(upload_error) => {
                    outcome.media_saved += 1;
                    if let Some(e) = upload_error {
                        outcome.failures.push(e);
                    }
                }
                Err(e) => {
                    tracing::error!(job_id = %self.job_id, item_id = item.id, error = %e, "Failed to save media");
                    outcome
                        .failures
                        .push(format!("item {}: failed to save media: {}", item.id, e));
                }
            }
            media_order += 1;
        }

        tracing::debug!(
            job_id = %self.job_id,
            item_id = lead.id,
            items = unit.items().len(),
            media = outcome.media_saved,
            "Stored post"
        );
        outcome
    }

    /// Upload (when enabled) and save one media row
    ///
    /// Returns the upload failure message, if any; the row is saved without a
    /// `file_url` in that case.
    async fn write_media(&self, post_id: i64, item: &RawItem, media_order: i64) -> Result<Option<String>> {
        let Some(media) = item.media.as_ref() else {
            return Ok(None);
        };

        let mut upload_error = None;
        let file_url = if self.download_media {
            match self.upload(item).await {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(job_id = %self.job_id, item_id = item.id, error = %e, "Media upload failed");
                    upload_error = Some(format!("item {}: media upload failed: {}", item.id, e));
                    None
                }
            }
        } else {
            None
        };

        let direct_url = match self.resolver {
            Some(resolver) => resolver.get_direct_url(self.source_id, item.id).await,
            None => None,
        };

        self.db
            .save_media(&NewMedia {
                post_id,
                file_id: media.file_id.clone(),
                media_type: media.kind.as_str().to_string(),
                file_size: media.size.map(|s| s as i64),
                mime_type: media.mime_type.clone(),
                width: media.width.map(i64::from),
                height: media.height.map(i64::from),
                duration: media.duration.map(i64::from),
                file_url,
                direct_url,
                media_order,
            })
            .await?;

        Ok(upload_error)
    }

    async fn upload(&self, item: &RawItem) -> Result<String> {
        let key = object_key(self.source_id, item);
        let key = key.as_str();
        let stored = with_retry(self.retry, || {
            self.policy
                .dispatch(self.client, self.store, self.source_id, item, key)
        })
        .await?;
        Ok(stored.url)
    }
}
