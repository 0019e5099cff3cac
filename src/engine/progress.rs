//! Job progress accumulator and cancellable waits.

use crate::config::PacingWindow;
use crate::error::{Error, Result};
use crate::types::{Job, JobPatch};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Counters owned by one job run, flushed to the store at checkpoints
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct JobProgress {
    pub(crate) cursor: i64,
    pub(crate) total_items_seen: u64,
    pub(crate) processed_items: u64,
    pub(crate) error_count: u64,
    pub(crate) last_error: Option<String>,
    /// Media rows saved during this run
    pub(crate) media_count: u64,
    /// Items processed during this run
    pub(crate) processed_this_run: u64,
    flushed_at: u64,
    /// `processed_items` as of the last committed page
    committed_processed: u64,
    committed_this_run: u64,
}

impl JobProgress {
    /// Start from the persisted counters of `job`
    pub(crate) fn from_job(job: &Job) -> Self {
        Self {
            cursor: job.cursor,
            total_items_seen: job.total_items_seen,
            processed_items: job.processed_items,
            error_count: job.error_count,
            last_error: job.last_error.clone(),
            media_count: 0,
            processed_this_run: 0,
            flushed_at: job.processed_items,
            committed_processed: job.processed_items,
            committed_this_run: 0,
        }
    }

    /// Record a degradable failure
    pub(crate) fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(message.into());
    }

    /// Record `count` processed items
    pub(crate) fn record_processed(&mut self, count: u64) {
        self.processed_items += count;
        self.processed_this_run += count;
    }

    /// Record a fetched page and the cursor after it
    pub(crate) fn record_page(&mut self, items: usize, cursor: i64) {
        self.total_items_seen += items as u64;
        self.cursor = cursor;
    }

    /// True once `every` items were processed since the last checkpoint
    pub(crate) fn checkpoint_due(&self, every: u64) -> bool {
        self.processed_items >= self.flushed_at + every.max(1)
    }

    /// Patch committing a fully processed page: fetch position plus counters
    ///
    /// Items counted after this point are uncommitted until the next page commit.
    pub(crate) fn commit_patch(&mut self) -> JobPatch {
        self.committed_processed = self.processed_items;
        self.committed_this_run = self.processed_this_run;
        JobPatch {
            cursor: Some(self.cursor),
            total_items_seen: Some(self.total_items_seen),
            ..self.checkpoint_patch()
        }
    }

    /// Forget items processed since the last page commit
    ///
    /// A resumed run processes that page again, so counting it now would count
    /// its items twice.
    pub(crate) fn discard_uncommitted(&mut self) {
        self.processed_items = self.committed_processed;
        self.processed_this_run = self.committed_this_run;
        self.flushed_at = self.flushed_at.min(self.processed_items);
    }

    /// Patch carrying the processing counters; marks them flushed
    pub(crate) fn checkpoint_patch(&mut self) -> JobPatch {
        self.flushed_at = self.processed_items;
        JobPatch {
            processed_items: Some(self.processed_items),
            error_count: Some(self.error_count),
            last_error: self.last_error.clone().map(Some),
            ..JobPatch::default()
        }
    }
}

/// Sleep for `duration` unless `cancel` fires first
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Randomized pacing delay; a zero window only checks for cancellation
pub(crate) async fn pace(window: PacingWindow, cancel: &CancellationToken) -> Result<()> {
    if window.is_zero() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        return Ok(());
    }
    sleep_or_cancel(window.pick(), cancel).await
}
