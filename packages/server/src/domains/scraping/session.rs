//! Low-fingerprint browser sessions with error-page and challenge recovery.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::detection::{is_challenge_url, looks_like_challenge, looks_like_error_page};
use crate::common::PipelineError;
use crate::config::ScraperConfig;
use crate::kernel::browser::{BaseBrowser, BasePage, ContextOptions, Cookie, Viewport};

/// Refreshes attempted when a page first loads as an error page.
pub const MAX_REFRESH_RETRIES: usize = 2;

const RELOAD_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SETTLE: Duration = Duration::from_secs(2);
const DEFAULT_CHALLENGE_POLL: Duration = Duration::from_secs(5);

const DESKTOP_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// Runs before any page script: hides automation markers.
pub const STEALTH_INIT_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
window.chrome = window.chrome || {};
window.chrome.runtime = window.chrome.runtime || {};
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
  window.navigator.permissions.query = (parameters) =>
    parameters.name === 'notifications'
      ? Promise.resolve({ state: Notification.permission })
      : originalQuery(parameters);
}
"#;

pub const VIEWPORT: Viewport = Viewport {
    width: 1280,
    height: 720,
};
pub const LOCALE: &str = "en-US";
pub const TIMEZONE: &str = "America/New_York";

pub fn pick_user_agent(configured: Option<&str>) -> String {
    if let Some(ua) = configured {
        return ua.to_string();
    }
    let idx = rand::rng().random_range(0..DESKTOP_USER_AGENTS.len());
    DESKTOP_USER_AGENTS[idx].to_string()
}

fn ms_token_cookie(value: &str) -> Cookie {
    Cookie {
        name: "msToken".to_string(),
        value: value.to_string(),
        domain: ".tiktok.com".to_string(),
        path: "/".to_string(),
        expires: None,
        http_only: false,
        secure: true,
        same_site: Some("None".to_string()),
    }
}

/// Opens pages with a consistent fingerprint and keeps the cookie jar on disk
/// between sessions.
pub struct StealthSessionManager {
    browser: Arc<dyn BaseBrowser>,
    config: ScraperConfig,
    settle: Duration,
    challenge_poll: Duration,
}

impl StealthSessionManager {
    pub fn new(browser: Arc<dyn BaseBrowser>, config: ScraperConfig) -> Self {
        Self {
            browser,
            config,
            settle: DEFAULT_SETTLE,
            challenge_poll: DEFAULT_CHALLENGE_POLL,
        }
    }

    /// Override the post-navigation settle delay.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_challenge_poll(mut self, interval: Duration) -> Self {
        self.challenge_poll = interval;
        self
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub fn cookie_file(&self) -> Option<PathBuf> {
        self.config
            .session_dir
            .as_ref()
            .map(|dir| dir.join("default").join("cookies.json"))
    }

    async fn restore_cookies(&self) -> Vec<Cookie> {
        let Some(path) = self.cookie_file() else {
            return Vec::new();
        };
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read saved cookies");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<Cookie>>(&raw) {
            Ok(cookies) => {
                debug!(count = cookies.len(), "Restored session cookies");
                cookies
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt cookie file");
                Vec::new()
            }
        }
    }

    pub async fn context_options(&self) -> ContextOptions {
        let mut cookies = self.restore_cookies().await;
        if let Some(token) = self.config.ms_token.as_deref() {
            cookies.retain(|c| c.name != "msToken");
            cookies.push(ms_token_cookie(token));
        }
        ContextOptions {
            user_agent: pick_user_agent(self.config.user_agent.as_deref()),
            viewport: VIEWPORT,
            locale: LOCALE.to_string(),
            timezone: TIMEZONE.to_string(),
            init_script: Some(STEALTH_INIT_SCRIPT.to_string()),
            cookies,
        }
    }

    /// Open a page. `label` names debug dumps for this session.
    pub async fn open(&self, label: &str) -> Result<StealthSession, PipelineError> {
        let options = self.context_options().await;
        let page = self
            .browser
            .new_page(options)
            .await
            .map_err(|e| PipelineError::ExtractionFailure(format!("Failed to open browser page: {:#}", e)))?;

        Ok(StealthSession {
            label: sanitize_label(label),
            page,
            config: self.config.clone(),
            settle: self.settle,
            challenge_poll: self.challenge_poll,
        })
    }

    /// Persist the cookie jar and close the page. Never fails the caller.
    pub async fn close(&self, mut session: StealthSession) {
        if let Some(path) = self.cookie_file() {
            if let Err(e) = persist_cookies(&path, session.page.as_ref()).await {
                warn!(path = %path.display(), error = %e, "Failed to persist session cookies");
            }
        }
        if let Err(e) = session.page.close().await {
            warn!(error = %e, "Failed to close page");
        }
    }

    pub async fn shutdown(&self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "Failed to close browser");
        }
    }
}

async fn persist_cookies(path: &std::path::Path, page: &dyn BasePage) -> anyhow::Result<()> {
    let cookies = page.cookies().await?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(&cookies)?;
    tokio::fs::write(path, json).await?;
    debug!(count = cookies.len(), "Persisted session cookies");
    Ok(())
}

async fn write_debug_file(dir: &std::path::Path, path: &std::path::Path, html: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, html).await
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// One open page plus the recovery routines extraction relies on.
pub struct StealthSession {
    label: String,
    page: Box<dyn BasePage>,
    config: ScraperConfig,
    settle: Duration,
    challenge_poll: Duration,
}

impl StealthSession {
    async fn settle(&self) {
        if !self.settle.is_zero() {
            sleep(self.settle).await;
        }
    }

    pub async fn goto(&mut self, url: &str) -> Result<(), PipelineError> {
        self.page
            .goto(url, self.config.navigation_timeout)
            .await
            .map_err(|e| PipelineError::ExtractionFailure(format!("Navigation to {} failed: {:#}", url, e)))?;
        self.settle().await;
        Ok(())
    }

    pub async fn is_error_page(&self) -> bool {
        match self.page.content().await {
            Ok(html) => looks_like_error_page(&html),
            Err(e) => {
                debug!(error = %e, "Could not read page for error check");
                false
            }
        }
    }

    pub async fn is_challenge_present(&self) -> bool {
        let url = self.page.url();
        if is_challenge_url(&url) {
            return true;
        }
        match self.page.content().await {
            Ok(html) => looks_like_challenge(&url, &html),
            Err(_) => false,
        }
    }

    /// Reload up to `max_retries` times; true once the error page is gone.
    pub async fn retry_with_refresh(&mut self, max_retries: usize) -> bool {
        for attempt in 1..=max_retries {
            info!(attempt, url = %self.page.url(), "Refreshing error page");
            if let Err(e) = self.page.reload(RELOAD_TIMEOUT).await {
                warn!(attempt, error = %e, "Reload failed");
                continue;
            }
            self.settle().await;
            if !self.is_error_page().await {
                return true;
            }
        }
        false
    }

    async fn wait_for_challenge_cleared(&mut self) -> bool {
        let deadline = Instant::now() + self.config.challenge_timeout;
        while Instant::now() < deadline {
            sleep(self.challenge_poll).await;
            if let Err(e) = self.page.reload(RELOAD_TIMEOUT).await {
                debug!(error = %e, "Reload while waiting on challenge failed");
                continue;
            }
            if !self.is_challenge_present().await {
                return true;
            }
        }
        false
    }

    /// Make sure the current page is usable: recover from error pages, then
    /// deal with anti-bot challenges.
    pub async fn ensure_navigable(&mut self) -> Result<(), PipelineError> {
        if self.is_error_page().await {
            warn!(url = %self.page.url(), "Error page detected");
            if !self.retry_with_refresh(MAX_REFRESH_RETRIES).await {
                self.dump_debug_html().await;
                return Err(PipelineError::ExtractionFailure(format!(
                    "Page still failing after {} refreshes: {}",
                    MAX_REFRESH_RETRIES,
                    self.page.url()
                )));
            }
        }

        if !self.is_challenge_present().await {
            return Ok(());
        }

        if !self.config.interactive {
            self.dump_debug_html().await;
            return Err(PipelineError::ExtractionFailure(format!(
                "Anti-bot challenge at {}",
                self.page.url()
            )));
        }

        warn!(
            url = %self.page.url(),
            timeout_secs = self.config.challenge_timeout.as_secs(),
            "Challenge detected, waiting for manual resolution"
        );
        let cleared = self.wait_for_challenge_cleared().await;
        if !cleared || self.is_error_page().await || self.is_challenge_present().await {
            self.dump_debug_html().await;
            return Err(PipelineError::ExtractionFailure(format!(
                "Challenge not resolved within {}s at {}",
                self.config.challenge_timeout.as_secs(),
                self.page.url()
            )));
        }

        info!("Challenge resolved");
        Ok(())
    }

    pub async fn scroll(&mut self) -> Result<(), PipelineError> {
        self.page
            .scroll()
            .await
            .map_err(|e| PipelineError::ExtractionFailure(format!("Scroll failed: {:#}", e)))
    }

    pub async fn content(&self) -> Result<String, PipelineError> {
        self.page
            .content()
            .await
            .map_err(|e| PipelineError::ExtractionFailure(format!("Could not read page: {:#}", e)))
    }

    pub fn url(&self) -> String {
        self.page.url()
    }

    async fn dump_debug_html(&self) {
        let Some(dir) = self.config.debug_dir.as_ref() else {
            return;
        };
        let Ok(html) = self.page.content().await else {
            return;
        };
        let path = dir.join(format!("{}-{}.html", self.label, Utc::now().format("%Y%m%dT%H%M%S%3f")));
        match write_debug_file(dir, &path, &html).await {
            Ok(()) => info!(path = %path.display(), "Saved debug HTML"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to save debug HTML"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_user_agent_wins() {
        assert_eq!(pick_user_agent(Some("custom/1.0")), "custom/1.0");
        let ua = pick_user_agent(None);
        assert!(DESKTOP_USER_AGENTS.contains(&ua.as_str()));
    }

    #[test]
    fn labels_are_filename_safe() {
        assert_eq!(sanitize_label("profile-@al.ice"), "profile-_al_ice");
    }

    #[test]
    fn ms_token_cookie_targets_platform_domain() {
        let c = ms_token_cookie("abc");
        assert_eq!(c.name, "msToken");
        assert_eq!(c.domain, ".tiktok.com");
        assert!(c.secure);
    }
}
