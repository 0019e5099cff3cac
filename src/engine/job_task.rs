//! Job execution: connect, fetch, complete albums, store, finish.

use crate::config::PacingWindow;
use crate::error::{Error, JobError, Result, SourceError};
use crate::media::MediaDispatchPolicy;
use crate::proxy::redact;
use crate::retry::with_retry;
use crate::source::SourceClient;
use crate::types::{Event, Job, JobId, JobPatch, JobResult, JobStatus, RawItem};
use async_trait::async_trait;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

use super::batch_fetch::{BatchFetchLoop, PageSink, target_pages};
use super::boundary::BoundaryResolver;
use super::processing::{PostWriter, assemble};
use super::progress::{JobProgress, pace};
use super::{ActiveJob, IngestEngine, job_not_found};

impl IngestEngine {
    /// Run a job until it completes, fails or is paused
    ///
    /// Resumes from the job's persisted cursor. Returns the number of items and
    /// media processed by this run. A paused or shut-down run returns
    /// [`Error::Cancelled`] and leaves the job `paused`; a fatal error leaves it
    /// `failed` with the reason in `last_error`.
    pub async fn run(&self, id: &JobId) -> Result<JobResult> {
        if !self.accepting_new.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let job = self.db.get_job(id).await?.ok_or_else(|| job_not_found(id))?;
        if job.status.is_terminal() {
            return Err(Error::Job(JobError::InvalidState {
                id: id.to_string(),
                operation: "run".to_string(),
                current_state: job.status.to_string(),
            }));
        }

        let handle = ActiveJob::default();
        {
            let mut active = self.active_jobs.lock().await;
            if active.contains_key(id) {
                return Err(Error::Job(JobError::AlreadyRunning { id: id.to_string() }));
            }
            active.insert(id.clone(), handle.clone());
        }

        let mut progress = JobProgress::from_job(&job);
        let outcome = self.execute(&job, &mut progress, &handle.cancel).await;
        let result = self
            .finish(id, &mut progress, outcome, handle.stop_reason())
            .await;

        self.active_jobs.lock().await.remove(id);
        result
    }

    async fn execute(
        &self,
        job: &Job,
        progress: &mut JobProgress,
        cancel: &CancellationToken,
    ) -> Result<JobResult> {
        self.db
            .update_job(&job.id, &JobPatch::status(JobStatus::Running))
            .await?;
        tracing::info!(job_id = %job.id, source_id = %job.source_id, cursor = job.cursor, "Job started");
        self.emit_event(Event::JobStarted {
            id: job.id.clone(),
            cursor: job.cursor,
        });

        let client = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            client = self.connect(job) => client?,
        };

        let result = self.ingest(job, client.as_ref(), progress, cancel).await;

        if let Err(e) = client.disconnect().await {
            tracing::warn!(job_id = %job.id, error = %e, "Source disconnect failed");
        }
        result
    }

    /// Open a source connection for `job`
    ///
    /// A job pinned to a proxy retries that proxy. Otherwise proxies are taken from
    /// the shared rotator; a network failure exiles the proxy and the next one is
    /// tried, up to once per configured proxy.
    async fn connect(&self, job: &Job) -> Result<Box<dyn SourceClient>> {
        if let Some(proxy) = job.config.proxy.as_deref() {
            crate::proxy::parse_proxy_url(proxy)?;
            tracing::debug!(job_id = %job.id, proxy = %redact(proxy), "Connecting through pinned proxy");
            return with_retry(&self.config.retry, || self.connector.connect(Some(proxy)))
                .await
                .map_err(Error::from);
        }

        if self.proxies.is_empty() {
            return with_retry(&self.config.retry, || self.connector.connect(None))
                .await
                .map_err(Error::from);
        }

        let mut last_error = SourceError::Network("no proxy available".to_string());
        for _ in 0..self.proxies.len() {
            let Some(proxy) = self.proxies.next() else {
                break;
            };
            match self.connector.connect(Some(&proxy)).await {
                Ok(client) => {
                    self.proxies.mark_success(&proxy);
                    tracing::debug!(job_id = %job.id, proxy = %redact(&proxy), "Connected");
                    return Ok(client);
                }
                Err(SourceError::Network(msg)) => {
                    tracing::warn!(job_id = %job.id, proxy = %redact(&proxy), error = %msg, "Proxy connection failed");
                    self.proxies.mark_failed(&proxy);
                    last_error = SourceError::Network(msg);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_error.into())
    }

    async fn ingest(
        &self,
        job: &Job,
        client: &dyn SourceClient,
        progress: &mut JobProgress,
        cancel: &CancellationToken,
    ) -> Result<JobResult> {
        let fetch_config = &self.config.fetch;

        let entity = client.get_entity(&job.source_id).await?;
        tracing::debug!(job_id = %job.id, entity_id = entity.id, title = ?entity.title, "Resolved channel");

        let page_size = if job.config.batch_size == 0 {
            fetch_config.page_size
        } else {
            job.config.batch_size
        };
        let pages = target_pages(job.config.limit, progress.total_items_seen, page_size);

        let with_direct_urls = job.config.fetch_direct_urls || fetch_config.fetch_direct_urls;
        let mut processor = PageProcessor {
            engine: self,
            job,
            boundary: BoundaryResolver {
                client,
                window: fetch_config.boundary_window,
                delay: fetch_config.boundary_delay,
                cancel,
            },
            writer: PostWriter {
                db: &self.db,
                client,
                store: self.store.as_ref(),
                resolver: with_direct_urls.then_some(self.resolver.as_ref()),
                policy: MediaDispatchPolicy::from_config(&self.config.media),
                retry: &self.config.retry,
                job_id: &job.id,
                source_id: &job.source_id,
                download_media: job.config.download_media && self.config.media.download_media,
            },
            item_delay: fetch_config.item_delay,
            flush_every: fetch_config.progress_flush_every,
            cancel,
            written: HashSet::new(),
        };

        BatchFetchLoop {
            client,
            db: &self.db,
            event_tx: &self.event_tx,
            job_id: &job.id,
            page_delay: fetch_config.page_delay,
            cancel,
        }
        .fetch_all(&job.source_id, progress.cursor, pages, page_size, progress, &mut processor)
        .await?;

        Ok(JobResult {
            processed: progress.processed_this_run,
            media_count: progress.media_count,
        })
    }

    /// Persist the terminal (or paused) state of a run
    async fn finish(
        &self,
        id: &JobId,
        progress: &mut JobProgress,
        outcome: Result<JobResult>,
        stop_reason: &str,
    ) -> Result<JobResult> {
        if matches!(outcome, Err(Error::Cancelled)) {
            progress.discard_uncommitted();
        }
        let counters = progress.checkpoint_patch();

        let (patch, event) = match &outcome {
            Ok(result) => {
                tracing::info!(
                    job_id = %id,
                    processed = result.processed,
                    media = result.media_count,
                    errors = progress.error_count,
                    "Job completed"
                );
                (
                    JobPatch {
                        status: Some(JobStatus::Completed),
                        ..counters
                    }
                    .completed_now(),
                    Event::JobCompleted {
                        id: id.clone(),
                        result: *result,
                    },
                )
            }
            Err(Error::Cancelled) => {
                tracing::info!(job_id = %id, cursor = progress.cursor, reason = stop_reason, "Job paused");
                (
                    JobPatch {
                        status: Some(JobStatus::Paused),
                        ..counters
                    }
                    .with_error(stop_reason),
                    Event::JobPaused { id: id.clone() },
                )
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Job failed");
                (
                    JobPatch {
                        status: Some(JobStatus::Failed),
                        ..counters
                    }
                    .with_error(e.to_string())
                    .completed_now(),
                    Event::JobFailed {
                        id: id.clone(),
                        error: e.to_string(),
                    },
                )
            }
        };

        if let Err(e) = self.db.update_job(id, &patch).await {
            tracing::error!(job_id = %id, error = %e, "Failed to persist final job state");
        }
        self.emit_event(event);
        outcome
    }
}

/// Completes, stores and counts one fetched page at a time
struct PageProcessor<'a> {
    engine: &'a IngestEngine,
    job: &'a Job,
    boundary: BoundaryResolver<'a>,
    writer: PostWriter<'a>,
    item_delay: PacingWindow,
    flush_every: u64,
    cancel: &'a CancellationToken,
    /// Items stored during this run; album members recovered for one page come
    /// back with the next
    written: HashSet<i64>,
}

#[async_trait]
impl PageSink for PageProcessor<'_> {
    async fn process_page(&mut self, page: Vec<RawItem>, progress: &mut JobProgress) -> Result<()> {
        let job_id = &self.job.id;
        let in_flight = page.len() as u64;

        let boundary = self.boundary.resolve(&self.job.source_id, &page).await?;
        for failure in boundary.failures {
            progress.record_error(failure);
        }

        let on_page: HashSet<i64> = page.iter().map(|i| i.id).collect();
        let units = assemble(page, boundary.items);
        tracing::debug!(job_id = %job_id, posts = units.len(), "Processing page");

        for unit in &units {
            let fetched = unit
                .items()
                .iter()
                .filter(|i| on_page.contains(&i.id))
                .count() as u64;

            if unit.items().iter().all(|i| self.written.contains(&i.id)) {
                progress.record_processed(fetched);
                continue;
            }

            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if !self.written.is_empty() {
                pace(self.item_delay, self.cancel).await?;
            }

            let outcome = self.writer.write(unit).await;
            self.written.extend(unit.items().iter().map(|i| i.id));
            progress.media_count += outcome.media_saved;
            for failure in outcome.failures {
                progress.record_error(failure);
            }
            progress.record_processed(fetched);

            if progress.checkpoint_due(self.flush_every) {
                self.engine
                    .db
                    .update_job(job_id, &progress.checkpoint_patch())
                    .await?;
                self.engine.emit_event(Event::Progress {
                    id: job_id.clone(),
                    processed: progress.processed_items,
                    total: progress.total_items_seen + in_flight,
                });
            }
        }
        Ok(())
    }
}
