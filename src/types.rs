//! Core types for channel-ingest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Unique identifier for an ingestion job
///
/// Formatted as `{source_id}_{creation_unix_millis}`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Build the id for a job created at `millis` for `source_id`
    pub fn for_source(source_id: &str, millis: i64) -> Self {
        Self(format!("{}_{}", source_id, millis))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl sqlx::Type<sqlx::Sqlite> for JobId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Job status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, not started yet
    Pending,
    /// Fetching or processing
    Running,
    /// Waiting out a throttle window, or paused by the user
    Paused,
    /// Finished successfully
    Completed,
    /// Aborted with a fatal error
    Failed,
}

impl JobStatus {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parse the database representation
    pub fn from_db(status: &str) -> Self {
        match status {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "paused" => JobStatus::Paused,
            "completed" => JobStatus::Completed,
            _ => JobStatus::Failed, // Unknown status is treated as terminal
        }
    }

    /// Completed and failed jobs are never mutated again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job settings, persisted alongside the job as JSON
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JobConfig {
    /// Items requested per page (default: 100)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Download and store media attachments (default: true)
    #[serde(default = "default_true")]
    pub download_media: bool,

    /// Pin this job to one proxy instead of rotating
    #[serde(default)]
    pub proxy: Option<String>,

    /// Item id to start paging from (0 = newest)
    #[serde(default)]
    pub start_offset: i64,

    /// Stop after roughly this many items (rounded up to whole pages)
    #[serde(default)]
    pub limit: Option<u64>,

    /// Resolve direct media URLs from the public web preview
    #[serde(default)]
    pub fetch_direct_urls: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            download_media: true,
            proxy: None,
            start_offset: 0,
            limit: None,
            fetch_direct_urls: false,
        }
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_true() -> bool {
    true
}

/// A durable ingestion job
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Job {
    /// Job identifier
    pub id: JobId,
    /// Channel being ingested
    pub source_id: String,
    /// Current status
    pub status: JobStatus,
    /// Last committed item id; the next page starts below it
    pub cursor: i64,
    /// Items fetched so far, including recovered album siblings
    pub total_items_seen: u64,
    /// Items processed so far
    pub processed_items: u64,
    /// Degradable failures so far
    pub error_count: u64,
    /// Reason for the latest pause, failure or degraded item
    pub last_error: Option<String>,
    /// When the job was created
    pub started_at: DateTime<Utc>,
    /// When the job reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Settings the job was created with
    pub config: JobConfig,
}

/// Sparse job update; `None` fields are left untouched
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobPatch {
    /// New status
    pub status: Option<JobStatus>,
    /// New cursor
    pub cursor: Option<i64>,
    /// New fetched-item count
    pub total_items_seen: Option<u64>,
    /// New processed-item count
    pub processed_items: Option<u64>,
    /// New error count
    pub error_count: Option<u64>,
    /// New last error (`Some(None)` clears it)
    pub last_error: Option<Option<String>>,
    /// Completion timestamp
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobPatch {
    /// Patch that only changes the status
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Also set `last_error`
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(Some(error.into()));
        self
    }

    /// Also set `completed_at` to now
    pub fn completed_now(mut self) -> Self {
        self.completed_at = Some(Utc::now());
        self
    }

    /// True when no field would change
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Derived view of a job with timing and progress
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct JobStats {
    /// The job record
    #[serde(flatten)]
    pub job: Job,
    /// Seconds between start and completion (or now, while active)
    pub duration_secs: i64,
    /// processed / total * 100, two decimals; 0 when nothing was fetched
    pub progress_percentage: f64,
}

impl JobStats {
    /// Compute the derived fields for `job` as of `now`
    pub fn from_job(job: Job, now: DateTime<Utc>) -> Self {
        let end = job.completed_at.unwrap_or(now);
        let duration_secs = (end - job.started_at).num_seconds().max(0);
        let progress_percentage = progress_percentage(job.processed_items, job.total_items_seen);
        Self {
            job,
            duration_secs,
            progress_percentage,
        }
    }
}

/// Percentage rounded to two decimals, 0 when `total` is 0
pub fn progress_percentage(processed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    // A page being processed counts its items before they are recorded as seen
    let pct = (processed as f64 / total as f64 * 100.0).min(100.0);
    (pct * 100.0).round() / 100.0
}

/// Outcome of a completed run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobResult {
    /// Items processed during this run
    pub processed: u64,
    /// Media attachments stored during this run
    pub media_count: u64,
}

/// Kind of media attached to an item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still image
    Photo,
    /// Video clip
    Video,
    /// Any other file
    Document,
}

impl MediaKind {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
        }
    }
}

/// Reference to a media attachment held by the source
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MediaRef {
    /// Source-side file identifier
    pub file_id: String,
    /// Media kind
    pub kind: MediaKind,
    /// Size in bytes, when the source reports it
    pub size: Option<u64>,
    /// MIME type, when the source reports it
    pub mime_type: Option<String>,
    /// Width in pixels
    pub width: Option<u32>,
    /// Height in pixels
    pub height: Option<u32>,
    /// Duration in seconds (video)
    pub duration: Option<u32>,
}

impl MediaRef {
    /// File extension used for object keys
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_deref() {
            Some(mime) if mime.starts_with("video/") => "mp4",
            Some(mime) if mime.starts_with("image/") => "jpg",
            Some(_) => "bin",
            None => match self.kind {
                MediaKind::Photo => "jpg",
                MediaKind::Video => "mp4",
                MediaKind::Document => "bin",
            },
        }
    }
}

/// One item fetched from the source
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RawItem {
    /// Item id, monotonic within the source
    pub id: i64,
    /// Album id, when the item belongs to one
    pub group_id: Option<i64>,
    /// Text body (may be empty)
    pub text: String,
    /// Publication time
    pub date: DateTime<Utc>,
    /// View counter at fetch time
    pub views: i64,
    /// Attached media
    pub media: Option<MediaRef>,
}

/// Items sharing one `group_id`, ordered by ascending id
#[derive(Clone, Debug, PartialEq)]
pub struct Album {
    /// Album id
    pub group_id: i64,
    /// Members, lowest id first
    pub items: Vec<RawItem>,
}

impl Album {
    /// The member whose text and metadata represent the album
    pub fn lead(&self) -> Option<&RawItem> {
        self.items.first()
    }
}

/// Aggregate counters for one channel
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChannelStats {
    /// Channel id
    pub source_id: String,
    /// Stored posts
    pub total_posts: i64,
    /// Stored media rows
    pub total_media: i64,
    /// Posts flagged as advertising
    pub ad_posts: i64,
    /// Lowest stored item id
    pub min_item_id: Option<i64>,
    /// Highest stored item id
    pub max_item_id: Option<i64>,
    /// Sum of stored view counters
    pub total_views: i64,
}

/// Event emitted during the job lifecycle
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A new job was created
    JobCreated {
        /// Job ID
        id: JobId,
        /// Channel
        source_id: String,
    },

    /// A run started (fresh or resumed)
    JobStarted {
        /// Job ID
        id: JobId,
        /// Cursor the run starts from
        cursor: i64,
    },

    /// A page was fetched and committed
    PageFetched {
        /// Job ID
        id: JobId,
        /// Items in the page
        items: usize,
        /// Cursor after the page
        cursor: i64,
    },

    /// The provider throttled us; the job waits before retrying the page
    RateLimited {
        /// Job ID
        id: JobId,
        /// Seconds to wait
        retry_after_secs: u64,
    },

    /// Progress checkpoint
    Progress {
        /// Job ID
        id: JobId,
        /// Items processed
        processed: u64,
        /// Items fetched
        total: u64,
    },

    /// The run stopped before finishing (user pause or shutdown)
    JobPaused {
        /// Job ID
        id: JobId,
    },

    /// The run finished
    JobCompleted {
        /// Job ID
        id: JobId,
        /// Run outcome
        result: JobResult,
    },

    /// The run aborted
    JobFailed {
        /// Job ID
        id: JobId,
        /// Failure reason
        error: String,
    },

    /// Engine is shutting down
    Shutdown,
}
