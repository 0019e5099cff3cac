//! Egress proxy rotation
//!
//! [`ProxyRotator`] hands out proxy endpoints in strict round-robin order, skipping
//! endpoints that callers reported as failed. When every endpoint has failed the
//! failed set is cleared so selection never locks up.
//!
//! The rotator never probes endpoints itself: callers report outcomes with
//! [`ProxyRotator::mark_failed`] and [`ProxyRotator::mark_success`].

use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use utoipa::ToSchema;

/// Proxy URL schemes accepted by [`parse_proxy_url`]
pub const SUPPORTED_SCHEMES: &[&str] = &["socks5", "socks5h", "socks4", "socks", "http", "https"];

/// Counters reported by [`ProxyRotator::stats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProxyStats {
    /// Configured endpoints
    pub total: usize,
    /// Endpoints currently marked failed
    pub failed: usize,
    /// Endpoints eligible for selection
    pub active: usize,
}

/// Round-robin proxy selector shared by all running jobs
#[derive(Debug)]
pub struct ProxyRotator {
    endpoints: Vec<String>,
    cursor: AtomicUsize,
    failed: Mutex<HashSet<String>>,
}

impl ProxyRotator {
    /// Create a rotator over `endpoints`, in order
    ///
    /// Duplicates are dropped. An empty list yields a rotator whose [`next`](Self::next)
    /// always returns `None` (direct connection).
    pub fn new(endpoints: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        let endpoints: Vec<String> = endpoints
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty() && seen.insert(e.clone()))
            .collect();

        if endpoints.is_empty() {
            tracing::debug!("No proxies configured, using direct connections");
        } else {
            tracing::info!(count = endpoints.len(), "Proxy rotator initialized");
        }

        Self {
            endpoints,
            cursor: AtomicUsize::new(0),
            failed: Mutex::new(HashSet::new()),
        }
    }

    /// Build a rotator from the `proxy` config section
    ///
    /// Inline entries come first, then entries from `proxy_file`. Every entry must
    /// be a valid proxy URL.
    pub async fn from_config(config: &ProxyConfig) -> Result<Self> {
        let mut endpoints = config.proxies.clone();
        if let Some(path) = &config.proxy_file {
            endpoints.extend(load_proxies_from_file(path).await?);
        }
        for endpoint in &endpoints {
            parse_proxy_url(endpoint)?;
        }
        Ok(Self::new(endpoints))
    }

    /// Whether any endpoints are configured
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Number of configured endpoints
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Next endpoint in rotation, or `None` when no endpoints are configured
    ///
    /// Failed endpoints are skipped. If all endpoints are failed the failed set is
    /// reset first. At most `len` probes are made per call.
    pub fn next(&self) -> Option<String> {
        let len = self.endpoints.len();
        if len == 0 {
            return None;
        }

        let mut failed = self.failed.lock().unwrap_or_else(|e| e.into_inner());
        if failed.len() >= len {
            tracing::warn!(total = len, "All proxies failed, resetting failed set");
            failed.clear();
        }

        for _ in 0..len {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
            let candidate = &self.endpoints[index];
            if !failed.contains(candidate) {
                return Some(candidate.clone());
            }
        }

        // Unreachable while the failed set is smaller than the endpoint list
        None
    }

    /// Exile an endpoint until it succeeds again or the set is reset
    pub fn mark_failed(&self, endpoint: &str) {
        if !self.endpoints.iter().any(|e| e == endpoint) {
            return;
        }
        let mut failed = self.failed.lock().unwrap_or_else(|e| e.into_inner());
        if failed.insert(endpoint.to_string()) {
            tracing::warn!(
                proxy = %redact(endpoint),
                failed = failed.len(),
                total = self.endpoints.len(),
                "Proxy marked as failed"
            );
        }
    }

    /// Clear a prior failure for an endpoint
    pub fn mark_success(&self, endpoint: &str) {
        let mut failed = self.failed.lock().unwrap_or_else(|e| e.into_inner());
        if failed.remove(endpoint) {
            tracing::debug!(proxy = %redact(endpoint), "Proxy recovered");
        }
    }

    /// Current counters
    pub fn stats(&self) -> ProxyStats {
        let failed = self.failed.lock().unwrap_or_else(|e| e.into_inner()).len();
        ProxyStats {
            total: self.endpoints.len(),
            failed,
            active: self.endpoints.len() - failed,
        }
    }
}

/// Read proxy URLs from a file, one per line
///
/// Blank lines and lines starting with `#` are skipped. A missing file yields an
/// empty list.
pub async fn load_proxies_from_file(path: &Path) -> Result<Vec<String>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "Proxy file not found, continuing without it");
            return Ok(Vec::new());
        }
        Err(e) => return Err(Error::Io(e)),
    };

    let proxies: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect();

    tracing::info!(path = %path.display(), count = proxies.len(), "Loaded proxies from file");
    Ok(proxies)
}

/// Validate a proxy URL and return it parsed
///
/// The scheme must be one of [`SUPPORTED_SCHEMES`] and a host is required.
pub fn parse_proxy_url(endpoint: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(endpoint).map_err(|e| Error::Config {
        message: format!("invalid proxy URL {}: {}", redact(endpoint), e),
        key: Some("proxy.proxies".into()),
    })?;

    if !SUPPORTED_SCHEMES.contains(&parsed.scheme()) {
        return Err(Error::Config {
            message: format!("unsupported proxy scheme: {}", parsed.scheme()),
            key: Some("proxy.proxies".into()),
        });
    }
    if parsed.host_str().is_none() {
        return Err(Error::Config {
            message: format!("proxy URL has no host: {}", redact(endpoint)),
            key: Some("proxy.proxies".into()),
        });
    }

    Ok(parsed)
}

/// Convert a proxy URL into a `reqwest` proxy for all traffic
///
/// `socks://` is treated as `socks5://`.
pub fn to_reqwest_proxy(endpoint: &str) -> Result<reqwest::Proxy> {
    let mut parsed = parse_proxy_url(endpoint)?;
    if parsed.scheme() == "socks" {
        // Url::set_scheme only fails for special/non-special switches; both are non-special
        let _ = parsed.set_scheme("socks5");
    }
    Ok(reqwest::Proxy::all(parsed.as_str())?)
}

/// Strip credentials from a proxy URL for logging
pub fn redact(endpoint: &str) -> String {
    match url::Url::parse(endpoint) {
        Ok(mut parsed) if !parsed.username().is_empty() || parsed.password().is_some() => {
            let _ = parsed.set_username("***");
            let _ = parsed.set_password(None);
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<invalid>".to_string(),
    }
}
