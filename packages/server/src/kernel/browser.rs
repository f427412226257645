//! Headless browser seam.
//!
//! Extraction code drives a [`BasePage`]; production pages are backed by a
//! Browserless service, tests use the scripted pages in `test_dependencies`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use browserless_client::{BrowserlessClient, RenderRequest, RenderedPage};
use rand::Rng;
use tracing::debug;

pub use browserless_client::{Cookie, Viewport};

/// Fingerprint and cookies applied to every page opened in a context.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub user_agent: String,
    pub viewport: Viewport,
    pub locale: String,
    pub timezone: String,
    pub init_script: Option<String>,
    pub cookies: Vec<Cookie>,
}

#[async_trait]
pub trait BasePage: Send + Sync {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<()>;

    async fn reload(&mut self, timeout: Duration) -> Result<()>;

    /// Scroll to the bottom and wait for lazy content.
    async fn scroll(&mut self) -> Result<()>;

    async fn content(&self) -> Result<String>;

    /// Current URL after redirects.
    fn url(&self) -> String;

    /// Cookie jar as of the last load.
    async fn cookies(&self) -> Result<Vec<Cookie>>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait BaseBrowser: Send + Sync {
    async fn new_page(&self, options: ContextOptions) -> Result<Box<dyn BasePage>>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Browserless
// =============================================================================

/// Lower bound of the wait after each scroll; up to 500ms of jitter is added.
const SCROLL_WAIT_BASE_MS: u64 = 1_500;
const SCROLL_WAIT_JITTER_MS: u64 = 500;

fn scroll_wait_ms() -> u64 {
    SCROLL_WAIT_BASE_MS + rand::rng().random_range(0..SCROLL_WAIT_JITTER_MS)
}

pub struct BrowserlessBrowser {
    client: std::sync::Arc<BrowserlessClient>,
    settle: Duration,
}

impl BrowserlessBrowser {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            client: std::sync::Arc::new(BrowserlessClient::new(base_url, token)),
            settle: Duration::from_millis(1_000),
        }
    }
}

#[async_trait]
impl BaseBrowser for BrowserlessBrowser {
    async fn new_page(&self, options: ContextOptions) -> Result<Box<dyn BasePage>> {
        Ok(Box::new(BrowserlessPage {
            client: self.client.clone(),
            settle: self.settle,
            cookies: options.cookies.clone(),
            options,
            url: String::new(),
            scrolls: 0,
            last: None,
        }))
    }
}

/// A page over a stateless render endpoint.
///
/// Every navigation, reload or scroll renders the page again from scratch,
/// replaying the scroll count and carrying the cookie jar forward.
pub struct BrowserlessPage {
    client: std::sync::Arc<BrowserlessClient>,
    options: ContextOptions,
    settle: Duration,
    cookies: Vec<Cookie>,
    url: String,
    scrolls: u32,
    last: Option<RenderedPage>,
}

impl BrowserlessPage {
    async fn render(&mut self, timeout: Duration) -> Result<()> {
        let request = RenderRequest {
            url: self.url.clone(),
            user_agent: Some(self.options.user_agent.clone()),
            viewport: self.options.viewport,
            locale: Some(self.options.locale.clone()),
            timezone: Some(self.options.timezone.clone()),
            init_script: self.options.init_script.clone(),
            cookies: self.cookies.clone(),
            scrolls: self.scrolls,
            scroll_wait_ms: scroll_wait_ms(),
            goto_timeout_ms: timeout.as_millis() as u64,
            settle_ms: self.settle.as_millis() as u64,
        };

        let rendered = self
            .client
            .render(&request)
            .await
            .with_context(|| format!("Failed to render {}", self.url))?;

        debug!(url = %rendered.url, scrolls = self.scrolls, cookies = rendered.cookies.len(), "Page rendered");

        if !rendered.cookies.is_empty() {
            self.cookies = rendered.cookies.clone();
        }
        self.last = Some(rendered);
        Ok(())
    }
}

#[async_trait]
impl BasePage for BrowserlessPage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<()> {
        self.url = url.to_string();
        self.scrolls = 0;
        self.render(timeout).await
    }

    async fn reload(&mut self, timeout: Duration) -> Result<()> {
        self.render(timeout).await
    }

    async fn scroll(&mut self) -> Result<()> {
        self.scrolls += 1;
        self.render(Duration::from_secs(30)).await
    }

    async fn content(&self) -> Result<String> {
        self.last
            .as_ref()
            .map(|p| p.html.clone())
            .context("Page has not been loaded")
    }

    fn url(&self) -> String {
        self.last
            .as_ref()
            .map(|p| p.url.clone())
            .unwrap_or_else(|| self.url.clone())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        Ok(self.cookies.clone())
    }
}
