//! # channel-ingest
//!
//! Resumable ingestion engine for paginated channel message sources.
//!
//! A job walks a channel from newest to oldest in fixed-size pages, persisting a
//! cursor after every page so an interrupted run picks up where it left off.
//! Albums split across page edges are completed with bounded look-behind and
//! look-ahead queries, posts and their media are stored with per-item error
//! isolation, and provider throttling pauses the job instead of failing it.
//!
//! ## Design Philosophy
//!
//! - **Durable progress** - the cursor and counters live in SQLite, not in memory
//! - **Pluggable edges** - the message protocol, object store and direct-URL
//!   lookup sit behind traits
//! - **Event-driven** - consumers subscribe to job events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use channel_ingest::{Config, IngestEngine, JobConfig, SourceConnector};
//! use std::sync::Arc;
//!
//! # async fn example(connector: Arc<dyn SourceConnector>) -> channel_ingest::Result<()> {
//! let engine = IngestEngine::new(Config::default(), connector).await?;
//!
//! let mut events = engine.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! let job = engine
//!     .create_or_resume_job("news", JobConfig::default(), true)
//!     .await?;
//! let result = engine.run(&job).await?;
//! println!("processed {} items", result.processed);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Direct media URL lookup from the public web preview
pub mod direct_url;
/// Ingestion engine (decomposed into focused submodules)
pub mod engine;
/// Error types
pub mod error;
/// Media transfer policy (buffered or streamed uploads)
pub mod media;
/// Egress proxy rotation
pub mod proxy;
/// Retry logic with exponential backoff
pub mod retry;
/// Message source protocol seam
pub mod source;
/// Object storage for media payloads
pub mod storage;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, FetchConfig, MediaConfig, PacingWindow, ProxyConfig, RetryConfig};
pub use db::Database;
pub use direct_url::{DirectUrlResolver, WebPreviewResolver};
pub use engine::{IngestEngine, is_advertising};
pub use error::{
    ApiError, DatabaseError, Error, ErrorDetail, JobError, Result, SourceError, ToHttpStatus,
};
pub use media::{DispatchMode, MediaDispatchPolicy, StoredMedia};
pub use proxy::{ProxyRotator, ProxyStats};
pub use source::{MessageQuery, SourceClient, SourceConnector, SourceEntity};
pub use storage::{FsObjectStore, ObjectStore};
pub use types::{
    ChannelStats, Event, Job, JobConfig, JobId, JobResult, JobStats, JobStatus, MediaKind,
    MediaRef, RawItem,
};

/// Run the engine until a termination signal arrives, then shut it down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// Running jobs are cancelled and left `paused` with their last committed
/// cursor, so the next process can resume them.
///
/// ```no_run
/// use channel_ingest::{IngestEngine, run_with_shutdown};
///
/// # async fn example(engine: IngestEngine) -> channel_ingest::Result<()> {
/// let _api = engine.spawn_api_server();
/// run_with_shutdown(engine).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(engine: IngestEngine) -> Result<()> {
    wait_for_signal().await;
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
