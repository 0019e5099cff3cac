//! Direct media URL resolution
//!
//! Channels with a public web preview expose CDN links for their media. The
//! [`WebPreviewResolver`] fetches `{base}/s/{channel}/{item_id}` and pulls the
//! photo, video or document link out of the HTML. Resolution is best effort: every
//! failure is logged and reported as `None`.

use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

static PHOTO_STYLE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?s)class="[^"]*tgme_widget_message_photo_wrap[^"]*"[^>]*?background-image:url\('([^']+)'\)"#).ok()
});

static VIDEO_SRC: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?s)tgme_widget_message_video_player.*?<video[^>]*?\ssrc="([^"]+)""#).ok()
});

static ANCHOR: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r#"<a\b[^>]*>"#).ok());

static HREF: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r#"\shref="([^"]+)""#).ok());

/// Looks up a public URL for an item's media
#[async_trait]
pub trait DirectUrlResolver: Send + Sync {
    /// Direct URL for the media of `item_id`, or `None` when unavailable
    async fn get_direct_url(&self, source_id: &str, item_id: i64) -> Option<String>;
}

/// Resolver that scrapes the channel's public web preview
#[derive(Clone, Debug)]
pub struct WebPreviewResolver {
    http_client: reqwest::Client,
    base_url: String,
}

impl WebPreviewResolver {
    /// Resolver against `base_url` (e.g. `https://t.me`), optionally through a proxy
    pub fn new(base_url: &str, timeout: Duration, proxy: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT);
        if let Some(proxy) = proxy {
            builder = builder.proxy(crate::proxy::to_reqwest_proxy(proxy)?);
        }
        let http_client = builder
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, source_id: &str, item_id: i64) -> Result<Option<String>> {
        let url = format!("{}/s/{}/{}", self.base_url, source_id, item_id);
        let response = self.http_client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Error::Other(format!(
                "HTTP {} fetching {}",
                response.status(),
                url
            )));
        }

        let html = response.text().await?;
        Ok(extract_media_url(&html))
    }
}

#[async_trait]
impl DirectUrlResolver for WebPreviewResolver {
    async fn get_direct_url(&self, source_id: &str, item_id: i64) -> Option<String> {
        match self.fetch(source_id, item_id).await {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(source_id, item_id, error = %e, "Direct URL lookup failed");
                None
            }
        }
    }
}

/// Find the first photo, video or document link in a preview page
pub fn extract_media_url(html: &str) -> Option<String> {
    if let Some(url) = capture(&PHOTO_STYLE, html) {
        return Some(url);
    }
    if let Some(url) = capture(&VIDEO_SRC, html) {
        return Some(url);
    }

    let (anchor, href) = (ANCHOR.as_ref()?, HREF.as_ref()?);
    anchor
        .find_iter(html)
        .map(|m| m.as_str())
        .filter(|tag| tag.contains("tgme_widget_message_document"))
        .find_map(|tag| href.captures(tag).map(|c| c[1].to_string()))
}

fn capture(pattern: &LazyLock<Option<Regex>>, html: &str) -> Option<String> {
    pattern
        .as_ref()?
        .captures(html)
        .map(|c| c[1].to_string())
}
