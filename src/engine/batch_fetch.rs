//! Paginated fetching with durable cursor and throttle absorption.

use crate::config::PacingWindow;
use crate::db::Database;
use crate::error::{Error, Result, SourceError};
use crate::source::{MessageQuery, SourceClient};
use crate::types::{Event, JobId, JobPatch, JobStatus, RawItem};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::progress::{JobProgress, pace, sleep_or_cancel};

/// Pages needed to reach `limit` items given what was already fetched
///
/// `None` means no page budget: fetch until the source runs out.
pub(crate) fn target_pages(limit: Option<u64>, total_items_seen: u64, page_size: usize) -> Option<u64> {
    let limit = limit?;
    let remaining = limit.saturating_sub(total_items_seen);
    Some(remaining.div_ceil(page_size.max(1) as u64))
}

/// Consumer of fetched pages
///
/// A page counts as done once `process_page` returns `Ok`; only then does the
/// cursor move past it.
#[async_trait]
pub(crate) trait PageSink: Send {
    async fn process_page(&mut self, page: Vec<RawItem>, progress: &mut JobProgress) -> Result<()>;
}

/// Walks the source from the job cursor toward older items
pub(crate) struct BatchFetchLoop<'a> {
    pub(crate) client: &'a dyn SourceClient,
    pub(crate) db: &'a Database,
    pub(crate) event_tx: &'a broadcast::Sender<Event>,
    pub(crate) job_id: &'a JobId,
    pub(crate) page_delay: PacingWindow,
    pub(crate) cancel: &'a CancellationToken,
}

impl BatchFetchLoop<'_> {
    /// Fetch pages starting below `cursor`, newest first, handing each to `sink`
    ///
    /// After `sink` has processed a page, the cursor, fetched-item count and
    /// processing counters are written to the job before the next page is
    /// requested. An interrupted page is requested again on resume. Stops on an
    /// empty page, a short page or after `target_pages` pages. Throttling pauses
    /// the job for the requested time and then retries the same page.
    ///
    /// Returns the number of pages committed.
    pub(crate) async fn fetch_all(
        &self,
        source_id: &str,
        cursor: i64,
        target_pages: Option<u64>,
        page_size: usize,
        progress: &mut JobProgress,
        sink: &mut dyn PageSink,
    ) -> Result<u64> {
        let mut cursor = cursor;
        let mut pages = 0u64;

        while target_pages.is_none_or(|target| pages < target) {
            let page = self.fetch_page(source_id, cursor, page_size).await?;

            let Some(last) = page.last() else {
                tracing::debug!(job_id = %self.job_id, cursor, "Source exhausted");
                break;
            };
            let next_cursor = last.id;
            let count = page.len();
            tracing::info!(job_id = %self.job_id, page = pages + 1, items = count, cursor = next_cursor, "Fetched page");

            sink.process_page(page, progress).await?;

            cursor = next_cursor;
            pages += 1;
            progress.record_page(count, cursor);
            self.db.update_job(self.job_id, &progress.commit_patch()).await?;
            self.event_tx
                .send(Event::PageFetched {
                    id: self.job_id.clone(),
                    items: count,
                    cursor,
                })
                .ok();

            if count < page_size {
                tracing::debug!(job_id = %self.job_id, count, page_size, "Short page, stopping");
                break;
            }
            if target_pages.is_some_and(|target| pages >= target) {
                break;
            }

            pace(self.page_delay, self.cancel).await?;
        }

        Ok(pages)
    }

    /// Request one page, waiting out throttles until it is served
    async fn fetch_page(&self, source_id: &str, cursor: i64, page_size: usize) -> Result<Vec<RawItem>> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let query = MessageQuery::page(cursor, page_size);
            let page = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                page = self.client.get_messages(source_id, query) => page,
            };

            match page {
                Ok(page) => return Ok(page),
                Err(SourceError::RateLimited { retry_after_secs }) => {
                    self.wait_out_throttle(retry_after_secs).await?;
                }
                Err(e) => {
                    tracing::error!(job_id = %self.job_id, cursor, error = %e, "Page fetch failed");
                    return Err(e.into());
                }
            }
        }
    }

    async fn wait_out_throttle(&self, retry_after_secs: u64) -> Result<()> {
        let reason = SourceError::RateLimited { retry_after_secs }.to_string();
        tracing::warn!(job_id = %self.job_id, retry_after_secs, "Rate limited, waiting");

        self.db
            .update_job(self.job_id, &JobPatch::status(JobStatus::Paused).with_error(reason))
            .await?;
        self.event_tx
            .send(Event::RateLimited {
                id: self.job_id.clone(),
                retry_after_secs,
            })
            .ok();

        sleep_or_cancel(Duration::from_secs(retry_after_secs), self.cancel).await?;

        self.db
            .update_job(self.job_id, &JobPatch::status(JobStatus::Running))
            .await?;
        tracing::info!(job_id = %self.job_id, "Resuming after rate limit");
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_helpers::{ScriptedSource, item};
    use crate::types::JobConfig;
    use tempfile::NamedTempFile;

    #[async_trait]
    impl PageSink for Vec<RawItem> {
        async fn process_page(&mut self, page: Vec<RawItem>, progress: &mut JobProgress) -> Result<()> {
            progress.record_processed(page.len() as u64);
            self.extend(page);
            Ok(())
        }
    }

    /// Processes part of the `stop_on`-th page, then gets cancelled
    struct StopMidPage {
        pages: usize,
        stop_on: usize,
    }

    #[async_trait]
    impl PageSink for StopMidPage {
        async fn process_page(&mut self, page: Vec<RawItem>, progress: &mut JobProgress) -> Result<()> {
            self.pages += 1;
            if self.pages == self.stop_on {
                progress.record_processed(3);
                return Err(Error::Cancelled);
            }
            progress.record_processed(page.len() as u64);
            Ok(())
        }
    }

    #[test]
    fn page_budget_from_limit() {
        assert_eq!(target_pages(None, 0, 100), None);
        assert_eq!(target_pages(Some(250), 0, 100), Some(3));
        assert_eq!(target_pages(Some(250), 200, 100), Some(1));
        assert_eq!(target_pages(Some(200), 200, 100), Some(0));
        assert_eq!(target_pages(Some(100), 300, 100), Some(0));
    }

    async fn setup(items: Vec<RawItem>) -> (Database, NamedTempFile, ScriptedSource, JobId) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).await.unwrap();
        let job = db.create_job("news", &JobConfig::default()).await.unwrap();
        db.update_job(&job.id, &JobPatch::status(JobStatus::Running))
            .await
            .unwrap();
        (db, temp_file, ScriptedSource::new(items), job.id)
    }

    fn fetch_loop<'a>(
        client: &'a dyn SourceClient,
        db: &'a Database,
        event_tx: &'a broadcast::Sender<Event>,
        job_id: &'a JobId,
        cancel: &'a CancellationToken,
    ) -> BatchFetchLoop<'a> {
        BatchFetchLoop {
            client,
            db,
            event_tx,
            job_id,
            page_delay: PacingWindow::none(),
            cancel,
        }
    }

    #[tokio::test]
    async fn stops_on_short_page_and_persists_cursor() {
        let (db, _temp, source, job_id) = setup((1..=25).map(item).collect()).await;
        let client = source.client();
        let (event_tx, _rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let fetch = fetch_loop(&client, &db, &event_tx, &job_id, &cancel);

        let job = db.get_job(&job_id).await.unwrap().unwrap();
        let mut progress = JobProgress::from_job(&job);
        let mut items = Vec::new();
        let pages = fetch
            .fetch_all("news", 0, None, 10, &mut progress, &mut items)
            .await
            .unwrap();

        assert_eq!(pages, 3);
        assert_eq!(items.len(), 25);
        assert_eq!(items.first().unwrap().id, 25);
        assert_eq!(items.last().unwrap().id, 1);
        assert_eq!(
            source.queries(),
            vec![
                MessageQuery::page(0, 10),
                MessageQuery::page(16, 10),
                MessageQuery::page(6, 10),
            ]
        );

        let job = db.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.cursor, 1);
        assert_eq!(job.total_items_seen, 25);
        assert_eq!(job.processed_items, 25);
    }

    #[tokio::test]
    async fn empty_page_ends_the_walk() {
        let (db, _temp, source, job_id) = setup((1..=20).map(item).collect()).await;
        let client = source.client();
        let (event_tx, _rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let fetch = fetch_loop(&client, &db, &event_tx, &job_id, &cancel);

        let mut progress = JobProgress::default();
        let mut items = Vec::new();
        fetch
            .fetch_all("news", 0, None, 10, &mut progress, &mut items)
            .await
            .unwrap();

        assert_eq!(items.len(), 20);
        // Two full pages, then an empty one
        assert_eq!(source.queries().len(), 3);
        assert_eq!(db.get_job(&job_id).await.unwrap().unwrap().cursor, 1);
    }

    #[tokio::test]
    async fn page_budget_limits_requests() {
        let (db, _temp, source, job_id) = setup((1..=100).map(item).collect()).await;
        let client = source.client();
        let (event_tx, _rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let fetch = fetch_loop(&client, &db, &event_tx, &job_id, &cancel);

        let mut progress = JobProgress::default();
        let mut items = Vec::new();
        fetch
            .fetch_all("news", 0, Some(2), 10, &mut progress, &mut items)
            .await
            .unwrap();

        assert_eq!(items.len(), 20);
        assert_eq!(source.queries().len(), 2);
        assert_eq!(progress.cursor, 81);
    }

    #[tokio::test]
    async fn resumes_strictly_below_cursor() {
        let (db, _temp, source, job_id) = setup((1..=30).map(item).collect()).await;
        let client = source.client();
        let (event_tx, _rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let fetch = fetch_loop(&client, &db, &event_tx, &job_id, &cancel);

        let mut progress = JobProgress::default();
        let mut items = Vec::new();
        fetch
            .fetch_all("news", 21, None, 10, &mut progress, &mut items)
            .await
            .unwrap();

        let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, (1..=20).rev().collect::<Vec<_>>());
        assert_eq!(source.queries()[0], MessageQuery::page(21, 10));
    }

    #[tokio::test]
    async fn unprocessed_page_keeps_previous_cursor() {
        let (db, _temp, source, job_id) = setup((1..=30).map(item).collect()).await;
        let client = source.client();
        let (event_tx, _rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let fetch = fetch_loop(&client, &db, &event_tx, &job_id, &cancel);

        let mut progress = JobProgress::default();
        let mut sink = StopMidPage { pages: 0, stop_on: 2 };
        let err = fetch
            .fetch_all("news", 0, None, 10, &mut progress, &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        // The second page was fetched but never finished
        assert_eq!(source.queries().len(), 2);
        let job = db.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.cursor, 21);
        assert_eq!(job.total_items_seen, 10);
        assert_eq!(job.processed_items, 10);
        assert_eq!(progress.cursor, 21);
    }

    #[tokio::test]
    async fn fatal_source_error_is_returned() {
        let (db, _temp, source, job_id) = setup((1..=30).map(item).collect()).await;
        source.fail_call(2, SourceError::AccessDenied("channel is private".into()));
        let client = source.client();
        let (event_tx, _rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();
        let fetch = fetch_loop(&client, &db, &event_tx, &job_id, &cancel);

        let mut progress = JobProgress::default();
        let mut items = Vec::new();
        let err = fetch
            .fetch_all("news", 0, None, 10, &mut progress, &mut items)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Source(SourceError::AccessDenied(_))));
        // First page stays committed
        assert_eq!(db.get_job(&job_id).await.unwrap().unwrap().cursor, 21);
    }

    #[tokio::test]
    async fn cancellation_during_throttle_keeps_cursor_and_pauses() {
        let (db, _temp, source, job_id) = setup((1..=30).map(item).collect()).await;
        source.fail_call(2, SourceError::RateLimited { retry_after_secs: 60 });
        let client = source.client();
        let (event_tx, mut rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            async move {
                while let Ok(event) = rx.recv().await {
                    if matches!(event, Event::RateLimited { .. }) {
                        cancel.cancel();
                        break;
                    }
                }
            }
        };
        let fetch = fetch_loop(&client, &db, &event_tx, &job_id, &cancel);

        let mut progress = JobProgress::default();
        let mut items = Vec::new();
        let (result, ()) = tokio::join!(
            fetch.fetch_all("news", 0, None, 10, &mut progress, &mut items),
            canceller
        );

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(items.len(), 10);
        let job = db.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Paused);
        assert_eq!(job.cursor, 21);
        assert_eq!(job.last_error.as_deref(), Some("rate limited: 60s"));
    }
}
