//! Database layer for channel-ingest
//!
//! Handles SQLite persistence for ingestion jobs, posts and media rows.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`jobs`] - Job store: creation, resume lookup, sparse updates, stats
//! - [`posts`] - Idempotent post and media upserts, channel aggregates

use crate::types::{Job, JobConfig, JobId, JobStatus};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod jobs;
mod migrations;
mod posts;

/// Job record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    /// Job identifier
    pub id: JobId,
    /// Channel being ingested
    pub source_id: String,
    /// Status string (pending, running, paused, completed, failed)
    pub status: String,
    /// Last committed item id
    pub cursor: i64,
    /// Items fetched so far
    pub total_items_seen: i64,
    /// Items processed so far
    pub processed_items: i64,
    /// Degradable failures so far
    pub error_count: i64,
    /// Latest error message
    pub last_error: Option<String>,
    /// Unix timestamp when the job was created
    pub started_at: i64,
    /// Unix timestamp when the job reached a terminal status
    pub completed_at: Option<i64>,
    /// JSON-encoded [`JobConfig`]
    pub config: String,
}

impl TryFrom<JobRow> for Job {
    type Error = crate::Error;

    fn try_from(row: JobRow) -> crate::Result<Self> {
        let config: JobConfig = serde_json::from_str(&row.config)?;
        Ok(Job {
            id: row.id,
            source_id: row.source_id,
            status: JobStatus::from_db(&row.status),
            cursor: row.cursor,
            total_items_seen: row.total_items_seen.max(0) as u64,
            processed_items: row.processed_items.max(0) as u64,
            error_count: row.error_count.max(0) as u64,
            last_error: row.last_error,
            started_at: from_unix(row.started_at),
            completed_at: row.completed_at.map(from_unix),
            config,
        })
    }
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

/// New post to be upserted
#[derive(Debug, Clone)]
pub struct NewPost {
    /// Channel the post belongs to
    pub source_id: String,
    /// Source item id (album lead for grouped posts)
    pub item_id: i64,
    /// Album id, when grouped
    pub group_id: Option<i64>,
    /// Text body
    pub text: String,
    /// Publication time
    pub date: DateTime<Utc>,
    /// View counter
    pub views: i64,
    /// Advertising flag
    pub is_ad: bool,
    /// Job that stored (or last refreshed) the post
    pub job_id: JobId,
}

/// Post record from database
#[derive(Debug, Clone, FromRow)]
pub struct PostRow {
    /// Unique database ID
    pub id: i64,
    /// Channel the post belongs to
    pub source_id: String,
    /// Source item id
    pub item_id: i64,
    /// Album id, when grouped
    pub group_id: Option<i64>,
    /// Text body
    pub text: String,
    /// Unix timestamp of publication
    pub date: i64,
    /// View counter
    pub views: i64,
    /// Advertising flag (0 = no, 1 = yes)
    pub is_ad: i32,
    /// Job that stored (or last refreshed) the post
    pub job_id: Option<String>,
}

/// New media row to be upserted
#[derive(Debug, Clone)]
pub struct NewMedia {
    /// Owning post
    pub post_id: i64,
    /// Source-side file identifier
    pub file_id: String,
    /// photo, video or document
    pub media_type: String,
    /// Size in bytes
    pub file_size: Option<i64>,
    /// MIME type
    pub mime_type: Option<String>,
    /// Width in pixels
    pub width: Option<i64>,
    /// Height in pixels
    pub height: Option<i64>,
    /// Duration in seconds
    pub duration: Option<i64>,
    /// URL returned by the object store
    pub file_url: Option<String>,
    /// Direct URL scraped from the public preview
    pub direct_url: Option<String>,
    /// Position within the album (0 for single posts)
    pub media_order: i64,
}

/// Media record from database
#[derive(Debug, Clone, FromRow)]
pub struct MediaRow {
    /// Unique database ID
    pub id: i64,
    /// Owning post
    pub post_id: i64,
    /// Source-side file identifier
    pub file_id: String,
    /// photo, video or document
    pub media_type: String,
    /// Size in bytes
    pub file_size: Option<i64>,
    /// MIME type
    pub mime_type: Option<String>,
    /// URL returned by the object store
    pub file_url: Option<String>,
    /// Direct URL scraped from the public preview
    pub direct_url: Option<String>,
    /// Position within the album
    pub media_order: i64,
}

/// Database handle for channel-ingest
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
