//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`parse`] - Starting, pausing and inspecting ingestion jobs
//! - [`stats`] - Channel and proxy counters
//! - [`system`] - Health, events, OpenAPI

use crate::types::{JobConfig, JobId, JobStats, JobStatus};
use serde::{Deserialize, Serialize};

mod parse;
mod stats;
mod system;

pub use parse::*;
pub use stats::*;
pub use system::*;

// ============================================================================
// Request/Response Types (shared across handlers)
// ============================================================================

/// Request body for POST /parse/start
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct StartJobRequest {
    /// Channel to ingest
    #[serde(default)]
    pub channel: String,
    /// Stop after roughly this many items (rounded up to whole pages)
    #[serde(default)]
    pub limit: Option<u64>,
    /// Items requested per page (default: 100)
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Download and store media attachments (default: true)
    #[serde(default)]
    pub download_media: Option<bool>,
    /// Item id to start paging from (default: 0, the newest item)
    #[serde(default)]
    pub offset: i64,
    /// Pin the job to this proxy
    #[serde(default)]
    pub proxy: Option<String>,
    /// Continue the channel's unfinished job instead of creating a new one
    #[serde(default)]
    pub resume: bool,
    /// Resolve direct media URLs from the public web preview
    #[serde(default)]
    pub fetch_direct_urls: bool,
}

impl StartJobRequest {
    /// Job settings for this request, falling back to [`JobConfig`] defaults
    pub fn job_config(&self) -> JobConfig {
        let defaults = JobConfig::default();
        JobConfig {
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            download_media: self.download_media.unwrap_or(defaults.download_media),
            proxy: self.proxy.clone().filter(|p| !p.trim().is_empty()),
            start_offset: self.offset.max(0),
            limit: self.limit,
            fetch_direct_urls: self.fetch_direct_urls,
        }
    }
}

/// Response for POST /parse/start and POST /parse/pause
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct JobStatusResponse {
    /// Job the request acted on
    pub job_id: JobId,
    /// Status after the request
    pub status: JobStatus,
}

/// Request body for POST /parse/pause
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct PauseJobRequest {
    /// Job to pause
    #[serde(default)]
    pub job_id: String,
}

/// Query parameters for GET /parse/jobs/:channel
#[derive(Debug, Deserialize, Serialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListJobsQuery {
    /// Maximum number of jobs to return (default: 20, max: 500)
    pub limit: Option<u32>,
}

/// Response for GET /parse/jobs/:channel
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobListResponse {
    /// Channel the jobs belong to
    pub channel: String,
    /// Number of jobs returned
    pub count: usize,
    /// Jobs, newest first
    pub jobs: Vec<JobStats>,
}
