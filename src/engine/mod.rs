//! Resumable ingestion engine split into focused submodules.
//!
//! The `IngestEngine` struct and its methods are organized by domain:
//! - [`job_task`] - Job execution: connect, fetch, complete albums, store, finish
//! - [`batch_fetch`] - Paginated fetching with durable cursor and throttle handling
//! - [`boundary`] - Album completion at fetch-window edges
//! - [`processing`] - Post assembly and storage with per-item error isolation
//! - [`progress`] - Progress accumulator and cancellable waits

mod batch_fetch;
mod boundary;
mod job_task;
mod processing;
mod progress;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use processing::is_advertising;

use crate::config::Config;
use crate::db::Database;
use crate::direct_url::{DirectUrlResolver, WebPreviewResolver};
use crate::error::{Error, JobError, Result};
use crate::proxy::{ProxyRotator, ProxyStats};
use crate::source::SourceConnector;
use crate::storage::{FsObjectStore, ObjectStore};
use crate::types::{ChannelStats, Event, JobConfig, JobId, JobPatch, JobStats, JobStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

/// Reason stored on a job whose run was interrupted by shutdown
pub(crate) const INTERRUPTED: &str = "interrupted: run stopped before completion";

/// Reason stored on a job paused through [`IngestEngine::pause`]
pub(crate) const PAUSED_BY_USER: &str = "paused by user";

/// Handle onto a running job
#[derive(Clone, Debug, Default)]
pub(crate) struct ActiveJob {
    pub(crate) cancel: CancellationToken,
    /// Set when the cancellation came from a user pause
    pub(crate) paused_by_user: Arc<AtomicBool>,
}

impl ActiveJob {
    /// Reason to record when the run stops early
    pub(crate) fn stop_reason(&self) -> &'static str {
        if self.paused_by_user.load(Ordering::SeqCst) {
            PAUSED_BY_USER
        } else {
            INTERRUPTED
        }
    }
}

/// Main engine instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct IngestEngine {
    /// Database instance for persistence
    /// Public for integration tests to query job and post rows
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Opens one source connection per job run
    pub(crate) connector: Arc<dyn SourceConnector>,
    /// Destination for media payloads
    pub(crate) store: Arc<dyn ObjectStore>,
    /// Direct media URL lookup, used by jobs that ask for it
    pub(crate) resolver: Arc<dyn DirectUrlResolver>,
    /// Egress proxies shared by every job
    pub(crate) proxies: Arc<ProxyRotator>,
    /// Running jobs and their cancellation handles
    pub(crate) active_jobs: Arc<Mutex<HashMap<JobId, ActiveJob>>>,
    /// Cleared during shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl IngestEngine {
    /// Create a new engine from configuration
    ///
    /// Opens the SQLite database (running migrations), builds the filesystem
    /// object store, the proxy rotator and the web-preview resolver. The source
    /// protocol is supplied by `connector`.
    pub async fn new(config: Config, connector: Arc<dyn SourceConnector>) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.media.storage_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create media directory '{}': {}",
                        config.media.storage_dir.display(),
                        e
                    ),
                ))
            })?;

        let db = Database::new(&config.persistence.database_path).await?;
        let store = Arc::new(FsObjectStore::new(
            &config.media.storage_dir,
            config.media.public_base_url.clone(),
        ));
        let resolver = Arc::new(WebPreviewResolver::new(
            &config.fetch.public_url_base,
            config.fetch.direct_url_timeout,
            None,
        )?);

        Self::with_parts(config, db, connector, store, resolver).await
    }

    /// Create an engine from explicit collaborators
    ///
    /// Jobs left `running` by a previous process are moved to `paused` so they can
    /// be resumed.
    pub async fn with_parts(
        config: Config,
        db: Database,
        connector: Arc<dyn SourceConnector>,
        store: Arc<dyn ObjectStore>,
        resolver: Arc<dyn DirectUrlResolver>,
    ) -> Result<Self> {
        config.validate()?;

        let interrupted = db.mark_interrupted_jobs().await?;
        if interrupted > 0 {
            tracing::warn!(count = interrupted, "Paused jobs interrupted by previous shutdown");
        }

        let proxies = ProxyRotator::from_config(&config.proxy).await?;

        // Buffer of 1000 events; slow subscribers get RecvError::Lagged
        let (event_tx, _rx) = broadcast::channel(1000);

        Ok(Self {
            db: Arc::new(db),
            event_tx,
            config: Arc::new(config),
            connector,
            store,
            resolver,
            proxies: Arc::new(proxies),
            active_jobs: Arc::new(Mutex::new(HashMap::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Find a resumable job for `source_id` or create a new one
    ///
    /// With `resume` set, the most recent pending, running or paused job for the
    /// channel is returned as is (its stored config wins over `config`).
    pub async fn create_or_resume_job(
        &self,
        source_id: &str,
        config: JobConfig,
        resume: bool,
    ) -> Result<JobId> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        if resume {
            if let Some(job) = self.db.find_resumable_job(source_id).await? {
                tracing::info!(
                    job_id = %job.id,
                    source_id,
                    cursor = job.cursor,
                    status = %job.status,
                    "Resuming existing job"
                );
                return Ok(job.id);
            }
        }

        let job = self.db.create_job(source_id, &config).await?;
        tracing::info!(job_id = %job.id, source_id, cursor = job.cursor, "Created job");
        self.emit_event(Event::JobCreated {
            id: job.id.clone(),
            source_id: source_id.to_string(),
        });
        Ok(job.id)
    }

    /// Pause a job
    ///
    /// A running job is cancelled at its next suspension point and keeps the
    /// cursor of its last committed page. Only an explicit [`run`](Self::run)
    /// resumes it. Pausing a paused job is a no-op.
    pub async fn pause(&self, id: &JobId) -> Result<()> {
        let job = self.db.get_job(id).await?.ok_or_else(|| job_not_found(id))?;

        if job.status.is_terminal() {
            return Err(Error::Job(JobError::InvalidState {
                id: id.to_string(),
                operation: "pause".to_string(),
                current_state: job.status.to_string(),
            }));
        }

        let active = self.active_jobs.lock().await.get(id).cloned();
        if let Some(active) = active {
            tracing::info!(job_id = %id, "Cancelling running job");
            active.paused_by_user.store(true, Ordering::SeqCst);
            active.cancel.cancel();
        }

        if job.status == JobStatus::Paused {
            return Ok(());
        }

        match self
            .db
            .update_job(id, &JobPatch::status(JobStatus::Paused).with_error(PAUSED_BY_USER))
            .await
        {
            Ok(_) => Ok(()),
            // The run finished between the read and the update
            Err(Error::Job(JobError::InvalidState { .. })) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Job record with derived duration and progress
    pub async fn get_stats(&self, id: &JobId) -> Result<JobStats> {
        self.db
            .job_stats(id)
            .await?
            .ok_or_else(|| job_not_found(id))
    }

    /// Most recent jobs for a channel, newest first
    pub async fn list_jobs(&self, source_id: &str, limit: u32) -> Result<Vec<JobStats>> {
        self.db.list_jobs(source_id, limit).await
    }

    /// Aggregate counters of everything stored for a channel
    pub async fn channel_stats(&self, source_id: &str) -> Result<ChannelStats> {
        self.db.channel_stats(source_id).await
    }

    /// Current proxy pool counters
    pub fn proxy_stats(&self) -> ProxyStats {
        self.proxies.stats()
    }

    /// Whether `id` currently has a worker
    pub async fn is_running(&self, id: &JobId) -> bool {
        self.active_jobs.lock().await.contains_key(id)
    }

    /// Subscribe to job events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than 1000 events,
    /// it will receive a `RecvError::Lagged` error.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Gracefully shut down the engine
    ///
    /// Stops accepting jobs, cancels every running job and waits (up to 30 seconds)
    /// for them to persist their state and exit.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);

        {
            let active = self.active_jobs.lock().await;
            tracing::debug!(active_count = active.len(), "Cancelling active jobs");
            for (id, job) in active.iter() {
                tracing::debug!(job_id = %id, "Signaling cancellation");
                job.cancel.cancel();
            }
        }

        let shutdown_timeout = std::time::Duration::from_secs(30);
        match tokio::time::timeout(shutdown_timeout, self.wait_for_active_jobs()).await {
            Ok(()) => tracing::info!("All active jobs stopped"),
            Err(_) => {
                tracing::warn!("Timeout waiting for jobs to stop, proceeding with shutdown")
            }
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    async fn wait_for_active_jobs(&self) {
        loop {
            let active_count = self.active_jobs.lock().await.len();
            if active_count == 0 {
                return;
            }
            tracing::debug!(active_count, "Waiting for active jobs to stop");
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }

    /// Emit an event to all subscribers; dropped silently when nobody listens
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Spawn the REST API server in a background task
    pub fn spawn_api_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let engine = Arc::new(self.clone());
        let config = self.config.clone();

        tokio::spawn(async move { crate::api::start_api_server(engine, config).await })
    }
}

pub(crate) fn job_not_found(id: &JobId) -> Error {
    Error::Job(JobError::NotFound { id: id.to_string() })
}
