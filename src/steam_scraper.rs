//! HTTP client for steamcommunity.com.
//!
//! `SteamSource` is the seam the import engine works against; the real
//! implementation drives reqwest through the global rate limiter and
//! classifies HTTP outcomes into the retriable/fatal taxonomy. HTML
//! interpretation lives in `steam_parser`.
//!
//! Cookies are assembled once per scraper and never persisted; they live
//! only for the duration of the session that created the scraper.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::rate_limiter::RateLimiter;
use crate::steam_parser::{self, DiscoveredGame};

const STEAM_COMMUNITY_URL: &str = "https://steamcommunity.com";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

// Privacy bitmask: private + friends-only + public
const PRIVACY_FILTER: u32 = 14;

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(8);

// Pagination safety stop; Steam grids top out well below this.
const MAX_GRID_PAGES: u32 = 200;

/// Failure taxonomy for scraper calls.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("network error: {0}")]
    TransientNetwork(String),

    #[error("rate limited by Steam")]
    RateLimited,

    #[error("auth_required")]
    AuthRequired,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled")]
    Cancelled,
}

impl ScrapeError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ScrapeError::TransientNetwork(_) | ScrapeError::RateLimited
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct SteamCredentials {
    pub user_id: String,
    pub steam_login_secure: Option<String>,
    pub session_id: Option<String>,
    pub is_numeric_id: bool,
}

impl SteamCredentials {
    pub fn is_numeric(&self) -> bool {
        self.is_numeric_id || self.user_id.chars().all(|c| c.is_ascii_digit())
    }
}

#[derive(Debug, Clone)]
pub struct SteamProfile {
    pub user_id: String,
    pub profile_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_numeric_id: bool,
}

/// One screenshot as discovered on a grid page, optionally enriched from
/// its detail page.
#[derive(Debug, Clone, Default)]
pub struct ScreenshotRef {
    pub steam_screenshot_id: String,
    pub detail_url: String,
    pub thumb_url: Option<String>,
    pub full_image_url: Option<String>,
    pub description: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct DownloadedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// The scraping surface the import engine depends on. Tests substitute a
/// stub; production uses [`SteamScraper`].
pub trait SteamSource: Send + Sync {
    fn validate_profile(&self) -> BoxFuture<'_, Result<SteamProfile, ScrapeError>>;

    fn discover_games(&self) -> BoxFuture<'_, Result<Vec<DiscoveredGame>, ScrapeError>>;

    /// Walks the paginated grid for one game. Enumeration stops when a
    /// page yields no ids not already seen.
    fn list_screenshots(
        &self,
        app_id: u32,
    ) -> BoxFuture<'_, Result<Vec<ScreenshotRef>, ScrapeError>>;

    /// Fills `full_image_url`, `description` and `taken_at` from the
    /// detail page.
    fn resolve_detail(
        &self,
        screenshot: ScreenshotRef,
    ) -> BoxFuture<'_, Result<ScreenshotRef, ScrapeError>>;

    fn download_image<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<DownloadedImage, ScrapeError>>;
}

pub struct SteamScraper {
    client: reqwest::Client,
    creds: SteamCredentials,
    base_url: String,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
}

impl SteamScraper {
    pub fn new(
        creds: SteamCredentials,
        limiter: Arc<RateLimiter>,
        cancel: CancellationToken,
    ) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(Self::cookie_headers(&creds))
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ScrapeError::TransientNetwork(e.to_string()))?;

        Ok(Self {
            client,
            creds,
            base_url: STEAM_COMMUNITY_URL.to_string(),
            limiter,
            cancel,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    fn cookie_headers(creds: &SteamCredentials) -> reqwest::header::HeaderMap {
        let mut cookie = String::new();
        if let Some(ref secure) = creds.steam_login_secure {
            cookie.push_str(&format!("steamLoginSecure={}; ", secure));
        }
        if let Some(ref sid) = creds.session_id {
            cookie.push_str(&format!("sessionid={}; ", sid));
        }
        // Age-gate bypass for games flagged mature.
        cookie.push_str("birthtime=0; mature_content=1; lastagecheckage=1-0-1990");

        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&cookie) {
            headers.insert(reqwest::header::COOKIE, value);
        }
        headers
    }

    fn profile_url(&self) -> String {
        if self.creds.is_numeric() {
            format!("{}/profiles/{}", self.base_url, self.creds.user_id)
        } else {
            format!("{}/id/{}", self.base_url, self.creds.user_id)
        }
    }

    fn screenshots_url(&self, app_id: u32, page: u32) -> String {
        format!(
            "{}/screenshots/?appid={}&sort=newestfirst&browsefilter=myfiles&view=grid&privacy={}&p={}",
            self.profile_url(),
            app_id,
            PRIVACY_FILTER,
            page
        )
    }

    fn absolute_url(&self, url: &str) -> String {
        if url.starts_with("http") {
            url.to_string()
        } else {
            format!("{}{}", self.base_url, url)
        }
    }

    /// One classified request attempt.
    async fn attempt(&self, url: &str) -> Result<reqwest::Response, ScrapeError> {
        self.limiter
            .acquire(&self.cancel)
            .await
            .map_err(|_| ScrapeError::Cancelled)?;

        let resp = self.client.get(url).send().await.map_err(|e| {
            ScrapeError::TransientNetwork(e.to_string())
        })?;

        // Steam bounces unauthenticated requests for private content to
        // the login page.
        if resp.url().path().starts_with("/login") {
            return Err(ScrapeError::AuthRequired);
        }

        let status = resp.status();
        if status.as_u16() == 429 {
            self.limiter.backoff().await;
            return Err(ScrapeError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ScrapeError::TransientNetwork(format!("HTTP {}", status)));
        }
        if status.as_u16() == 404 {
            return Err(ScrapeError::NotFound(url.to_string()));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ScrapeError::AuthRequired);
        }
        if !status.is_success() {
            return Err(ScrapeError::Parse(format!("unexpected HTTP {}", status)));
        }

        self.limiter.decay().await;
        Ok(resp)
    }

    /// Retries transient failures with exponential backoff.
    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response, ScrapeError> {
        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = std::cmp::min(BACKOFF_BASE * 2u32.pow(attempt - 1), BACKOFF_CAP);
                debug!("Retrying {} in {:?} (attempt {})", url, backoff, attempt + 1);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(ScrapeError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            match self.attempt(url).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retriable() => {
                    warn!("Request to {} failed ({}), will retry", url, e);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| ScrapeError::TransientNetwork("retries exhausted".into())))
    }

    async fn get_html(&self, url: &str) -> Result<String, ScrapeError> {
        let resp = self.get_with_retry(url).await?;
        resp.text()
            .await
            .map_err(|e| ScrapeError::TransientNetwork(e.to_string()))
    }

    async fn validate_profile_inner(&self) -> Result<SteamProfile, ScrapeError> {
        let html = self.get_html(&self.profile_url()).await?;

        if steam_parser::is_error_page(&html) {
            return Err(ScrapeError::Parse(
                "Steam profile not found or is private".to_string(),
            ));
        }

        let parsed = steam_parser::parse_profile(&html);
        if parsed.profile_name.is_none() {
            return Err(ScrapeError::Parse(
                "profile page is missing expected markers".to_string(),
            ));
        }

        Ok(SteamProfile {
            user_id: self.creds.user_id.clone(),
            profile_name: parsed.profile_name,
            avatar_url: parsed.avatar_url,
            is_numeric_id: self.creds.is_numeric(),
        })
    }

    async fn discover_games_inner(&self) -> Result<Vec<DiscoveredGame>, ScrapeError> {
        let url = self.screenshots_url(0, 1);
        let html = self.get_html(&url).await?;
        Ok(steam_parser::parse_game_sidebar(&html))
    }

    async fn list_screenshots_inner(&self, app_id: u32) -> Result<Vec<ScreenshotRef>, ScrapeError> {
        let mut seen = std::collections::HashSet::new();
        let mut all = Vec::new();

        for page in 1..=MAX_GRID_PAGES {
            let url = self.screenshots_url(app_id, page);
            let html = self.get_html(&url).await?;

            let mut new_on_page = 0;
            for shot in steam_parser::parse_grid_page(&html) {
                if !seen.insert(shot.steam_screenshot_id.clone()) {
                    continue;
                }
                new_on_page += 1;
                let full_image_url = shot.thumb_url.as_deref().map(steam_parser::full_image_url);
                all.push(ScreenshotRef {
                    steam_screenshot_id: shot.steam_screenshot_id,
                    detail_url: shot.detail_url,
                    thumb_url: shot.thumb_url,
                    full_image_url,
                    description: None,
                    taken_at: None,
                });
            }

            if new_on_page == 0 {
                break;
            }
        }

        debug!("Enumerated {} screenshots for app {}", all.len(), app_id);
        Ok(all)
    }

    async fn resolve_detail_inner(
        &self,
        mut screenshot: ScreenshotRef,
    ) -> Result<ScreenshotRef, ScrapeError> {
        let url = self.absolute_url(&screenshot.detail_url);
        let mut html = self.get_html(&url).await?;

        if steam_parser::has_age_gate(&html) {
            // Replay with the view-anyway form parameters; without a
            // session id the gate cannot be bypassed.
            let session_id = self.creds.session_id.as_deref().unwrap_or("");
            let separator = if url.contains('?') { '&' } else { '?' };
            let bypass_url = format!(
                "{}{}sessionid={}&wants_mature_content=1",
                url, separator, session_id
            );
            html = self.get_html(&bypass_url).await?;
        }

        let detail = steam_parser::parse_detail_page(&html);
        if let Some(full) = detail.full_image_url {
            screenshot.full_image_url = Some(full);
        }
        if detail.description.is_some() {
            screenshot.description = detail.description;
        }
        if let Some(naive) = detail.taken_at {
            screenshot.taken_at = Some(naive.and_utc());
        }
        Ok(screenshot)
    }

    async fn download_image_inner(&self, url: &str) -> Result<DownloadedImage, ScrapeError> {
        let resp = self.get_with_retry(url).await?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ScrapeError::TransientNetwork(e.to_string()))?;

        Ok(DownloadedImage {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

impl SteamSource for SteamScraper {
    fn validate_profile(&self) -> BoxFuture<'_, Result<SteamProfile, ScrapeError>> {
        Box::pin(self.validate_profile_inner())
    }

    fn discover_games(&self) -> BoxFuture<'_, Result<Vec<DiscoveredGame>, ScrapeError>> {
        Box::pin(self.discover_games_inner())
    }

    fn list_screenshots(
        &self,
        app_id: u32,
    ) -> BoxFuture<'_, Result<Vec<ScreenshotRef>, ScrapeError>> {
        Box::pin(self.list_screenshots_inner(app_id))
    }

    fn resolve_detail(
        &self,
        screenshot: ScreenshotRef,
    ) -> BoxFuture<'_, Result<ScreenshotRef, ScrapeError>> {
        Box::pin(self.resolve_detail_inner(screenshot))
    }

    fn download_image<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<DownloadedImage, ScrapeError>> {
        Box::pin(self.download_image_inner(url))
    }
}
