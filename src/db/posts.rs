//! Idempotent post and media persistence.

use crate::error::DatabaseError;
use crate::types::ChannelStats;
use crate::{Error, Result};

use super::{Database, MediaRow, NewMedia, NewPost, PostRow};

impl Database {
    /// Insert or refresh a post, keyed by `(source_id, item_id)`
    ///
    /// A second call for the same key updates `views` and `job_id` and returns the
    /// existing row id.
    pub async fn save_post(&self, post: &NewPost) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO posts (
                source_id, item_id, group_id, text, date, views, is_ad, job_id,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id, item_id) DO UPDATE SET
                views = excluded.views,
                job_id = excluded.job_id,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&post.source_id)
        .bind(post.item_id)
        .bind(post.group_id)
        .bind(&post.text)
        .bind(post.date.timestamp())
        .bind(post.views)
        .bind(post.is_ad as i32)
        .bind(&post.job_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save post: {}",
                e
            )))
        })?;

        Ok(id)
    }

    /// Insert or refresh a media row, keyed by `(post_id, file_id)`
    ///
    /// A second call for the same key overwrites the URLs and size and returns the
    /// existing row id.
    pub async fn save_media(&self, media: &NewMedia) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO media (
                post_id, file_id, media_type, file_size, mime_type, width, height,
                duration, file_url, direct_url, media_order, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(post_id, file_id) DO UPDATE SET
                file_url = excluded.file_url,
                direct_url = excluded.direct_url,
                file_size = excluded.file_size,
                media_order = excluded.media_order
            RETURNING id
            "#,
        )
        .bind(media.post_id)
        .bind(&media.file_id)
        .bind(&media.media_type)
        .bind(media.file_size)
        .bind(&media.mime_type)
        .bind(media.width)
        .bind(media.height)
        .bind(media.duration)
        .bind(&media.file_url)
        .bind(&media.direct_url)
        .bind(media.media_order)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save media: {}",
                e
            )))
        })?;

        Ok(id)
    }

    /// Get a post by its natural key
    pub async fn get_post(&self, source_id: &str, item_id: i64) -> Result<Option<PostRow>> {
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, source_id, item_id, group_id, text, date, views, is_ad, job_id
            FROM posts
            WHERE source_id = ? AND item_id = ?
            "#,
        )
        .bind(source_id)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get post: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Posts stored for a channel, oldest item first
    pub async fn list_posts(&self, source_id: &str) -> Result<Vec<PostRow>> {
        let rows = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, source_id, item_id, group_id, text, date, views, is_ad, job_id
            FROM posts
            WHERE source_id = ?
            ORDER BY item_id ASC
            "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list posts: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Media rows of a post in album order
    pub async fn list_media(&self, post_id: i64) -> Result<Vec<MediaRow>> {
        let rows = sqlx::query_as::<_, MediaRow>(
            r#"
            SELECT id, post_id, file_id, media_type, file_size, mime_type,
                   file_url, direct_url, media_order
            FROM media
            WHERE post_id = ?
            ORDER BY media_order ASC
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list media: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Aggregate counters for one channel
    pub async fn channel_stats(&self, source_id: &str) -> Result<ChannelStats> {
        let (total_posts, ad_posts, min_item_id, max_item_id, total_views): (
            i64,
            Option<i64>,
            Option<i64>,
            Option<i64>,
            Option<i64>,
        ) = sqlx::query_as(
            r#"
            SELECT COUNT(*), SUM(is_ad), MIN(item_id), MAX(item_id), SUM(views)
            FROM posts
            WHERE source_id = ?
            "#,
        )
        .bind(source_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to compute channel stats: {}",
                e
            )))
        })?;

        let total_media: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM media m
            JOIN posts p ON p.id = m.post_id
            WHERE p.source_id = ?
            "#,
        )
        .bind(source_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count media: {}",
                e
            )))
        })?;

        Ok(ChannelStats {
            source_id: source_id.to_string(),
            total_posts,
            total_media,
            ad_posts: ad_posts.unwrap_or(0),
            min_item_id,
            max_item_id,
            total_views: total_views.unwrap_or(0),
        })
    }
}
