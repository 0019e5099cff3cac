//! Configuration types for channel-ingest

use crate::error::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

/// Main configuration for [`IngestEngine`](crate::IngestEngine)
///
/// Fields are organized into sub-configs:
/// - [`persistence`](PersistenceConfig) - SQLite location
/// - [`fetch`](FetchConfig) - paging, pacing, boundary completion, progress cadence
/// - [`media`](MediaConfig) - media download and upload strategy
/// - [`proxy`](ProxyConfig) - egress proxy endpoints
/// - [`retry`](RetryConfig) - backoff for connection and media transfer failures
/// - [`api`](ApiConfig) - REST front end
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Batch fetch behaviour
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Media handling
    #[serde(default)]
    pub media: MediaConfig,

    /// Egress proxies
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Retry policy for transient network failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// REST API
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.fetch.page_size == 0 {
            return Err(config_error("page size must be at least 1", "fetch.page_size"));
        }
        if self.fetch.progress_flush_every == 0 {
            return Err(config_error(
                "progress flush cadence must be at least 1",
                "fetch.progress_flush_every",
            ));
        }
        if self.fetch.boundary_window <= 1 {
            return Err(config_error(
                "boundary window must be greater than 1",
                "fetch.boundary_window",
            ));
        }
        for (window, key) in [
            (&self.fetch.page_delay, "fetch.page_delay"),
            (&self.fetch.item_delay, "fetch.item_delay"),
            (&self.fetch.boundary_delay, "fetch.boundary_delay"),
        ] {
            if window.min_ms > window.max_ms {
                return Err(config_error("pacing minimum exceeds maximum", key));
            }
        }
        if self.media.chunk_size == 0 {
            return Err(config_error("chunk size must be at least 1", "media.chunk_size"));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PersistenceConfig {
    /// Database path (default: "./channel-ingest.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// A randomized delay window, in milliseconds
///
/// Pacing keeps request rate under provider limits. `{0, 0}` disables it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PacingWindow {
    /// Lower bound in milliseconds
    pub min_ms: u64,
    /// Upper bound in milliseconds (inclusive)
    pub max_ms: u64,
}

impl PacingWindow {
    /// Create a window from explicit bounds
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// A window that never waits
    pub const fn none() -> Self {
        Self::new(0, 0)
    }

    /// True when the window always yields a zero delay
    pub fn is_zero(&self) -> bool {
        self.max_ms == 0
    }

    /// Pick a uniformly random delay inside the window
    pub fn pick(&self) -> Duration {
        if self.is_zero() {
            return Duration::ZERO;
        }
        let hi = self.max_ms.max(self.min_ms);
        let ms = rand::thread_rng().gen_range(self.min_ms..=hi);
        Duration::from_millis(ms)
    }
}

/// Batch fetch configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FetchConfig {
    /// Default page size when a job does not set one (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Delay between successful pages (default: 3-7 s)
    #[serde(default = "default_page_delay")]
    pub page_delay: PacingWindow,

    /// Delay between processed items (default: 100-500 ms)
    #[serde(default = "default_item_delay")]
    pub item_delay: PacingWindow,

    /// Id distance probed on either side of a truncated album (default: 10)
    ///
    /// Matches the provider's maximum album size.
    #[serde(default = "default_boundary_window")]
    pub boundary_window: i64,

    /// Delay between the boundary look-behind and look-ahead queries (default: 1-2 s)
    #[serde(default = "default_boundary_delay")]
    pub boundary_delay: PacingWindow,

    /// Persist progress counters every N processed items (default: 10)
    #[serde(default = "default_progress_flush_every")]
    pub progress_flush_every: u64,

    /// Resolve direct media URLs from the public web preview (default: false)
    #[serde(default)]
    pub fetch_direct_urls: bool,

    /// Base URL of the public web preview (default: "https://t.me")
    #[serde(default = "default_public_url_base")]
    pub public_url_base: String,

    /// Request timeout for the web preview (default: 10 seconds)
    #[serde(default = "default_direct_url_timeout", with = "duration_serde")]
    pub direct_url_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            page_delay: default_page_delay(),
            item_delay: default_item_delay(),
            boundary_window: default_boundary_window(),
            boundary_delay: default_boundary_delay(),
            progress_flush_every: default_progress_flush_every(),
            fetch_direct_urls: false,
            public_url_base: default_public_url_base(),
            direct_url_timeout: default_direct_url_timeout(),
        }
    }
}

impl FetchConfig {
    /// A configuration with every pacing delay disabled
    pub fn without_pacing(self) -> Self {
        Self {
            page_delay: PacingWindow::none(),
            item_delay: PacingWindow::none(),
            boundary_delay: PacingWindow::none(),
            ..self
        }
    }
}

/// Media handling configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct MediaConfig {
    /// Allow media downloads; when false no job downloads media (default: true)
    #[serde(default = "default_true")]
    pub download_media: bool,

    /// Objects at or above this size are streamed instead of buffered (default: 50 MiB)
    #[serde(default = "default_stream_threshold")]
    pub stream_threshold: u64,

    /// Chunk size requested from the source when streaming (default: 2 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Root directory of the filesystem object store (default: "./media")
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Public URL prefix for stored objects (default: none, file paths are returned)
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            download_media: true,
            stream_threshold: default_stream_threshold(),
            chunk_size: default_chunk_size(),
            storage_dir: default_storage_dir(),
            public_base_url: None,
        }
    }
}

/// Egress proxy configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct ProxyConfig {
    /// Proxy URLs (socks5://, socks4://, http://, https://)
    #[serde(default)]
    pub proxies: Vec<String>,

    /// File with one proxy URL per line, appended to `proxies`
    #[serde(default)]
    pub proxy_file: Option<PathBuf>,
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:3000)
    #[serde(default = "default_bind_address")]
    #[schema(value_type = String)]
    pub bind_address: SocketAddr,

    /// Optional API key for authentication
    #[serde(default)]
    pub api_key: Option<String>,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            api_key: None,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./channel-ingest.db")
}

fn default_page_size() -> usize {
    100
}

fn default_page_delay() -> PacingWindow {
    PacingWindow::new(3_000, 7_000)
}

fn default_item_delay() -> PacingWindow {
    PacingWindow::new(100, 500)
}

fn default_boundary_window() -> i64 {
    10
}

fn default_boundary_delay() -> PacingWindow {
    PacingWindow::new(1_000, 2_000)
}

fn default_progress_flush_every() -> u64 {
    10
}

fn default_public_url_base() -> String {
    "https://t.me".into()
}

fn default_direct_url_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_stream_threshold() -> u64 {
    50 * 1024 * 1024 // 50 MiB
}

fn default_chunk_size() -> usize {
    2 * 1024 * 1024 // 2 MiB
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./media")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
