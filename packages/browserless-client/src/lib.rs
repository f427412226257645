//! HTTP client for a Browserless-compatible rendering service.
//!
//! [`BrowserlessClient::render`] posts a Puppeteer function to `/function`
//! that loads a page inside a configured context (user agent, viewport,
//! cookies, init script), scrolls, and returns the HTML together with the
//! cookie jar.

pub mod error;
pub mod types;

pub use error::{BrowserlessError, Result};
pub use types::{Cookie, RenderRequest, RenderedPage, Viewport};

use std::time::Duration;

use serde::Serialize;

/// Puppeteer function executed by `/function` for [`BrowserlessClient::render`].
const RENDER_FUNCTION: &str = r#"
export default async function ({ page, context }) {
  if (context.userAgent) await page.setUserAgent(context.userAgent);
  await page.setViewport(context.viewport);
  if (context.locale) await page.setExtraHTTPHeaders({ 'Accept-Language': context.locale });
  if (context.timezone) await page.emulateTimezone(context.timezone);
  if (context.initScript) await page.evaluateOnNewDocument(context.initScript);
  if (context.cookies.length) await page.setCookie(...context.cookies);
  await page.goto(context.url, { waitUntil: 'domcontentloaded', timeout: context.gotoTimeoutMs });
  await new Promise((r) => setTimeout(r, context.settleMs));
  for (let i = 0; i < context.scrolls; i++) {
    await page.evaluate(() => window.scrollTo(0, document.body.scrollHeight));
    await new Promise((r) => setTimeout(r, context.scrollWaitMs));
  }
  const html = await page.content();
  const cookies = await page.cookies();
  return { data: { html, url: page.url(), cookies }, type: 'application/json' };
}
"#;

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            timeout: Duration::from_secs(30),
        }
    }

    /// Upper bound for a whole request, including server-side rendering.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        let mut endpoint = format!("{}/{}", self.base_url, path);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B, timeout: Duration) -> Result<String> {
        let resp = self
            .client
            .post(self.endpoint(path))
            .header("Content-Type", "application/json")
            .json(body)
            .timeout(timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }

    /// Render a page inside a configured context and return HTML plus cookies.
    pub async fn render(&self, request: &RenderRequest) -> Result<RenderedPage> {
        let context = serde_json::to_value(request).map_err(|e| BrowserlessError::Decode(e.to_string()))?;
        let body = serde_json::json!({ "code": RENDER_FUNCTION, "context": context });

        // Scrolling happens server-side, so allow for it on top of navigation.
        let budget = Duration::from_millis(
            request.goto_timeout_ms
                + request.settle_ms
                + request.scroll_wait_ms * u64::from(request.scrolls),
        ) + Duration::from_secs(10);
        let timeout = budget.max(self.timeout);

        let text = self.post_json("function", &body, timeout).await?;
        tracing::debug!(url = %request.url, bytes = text.len(), scrolls = request.scrolls, "Rendered page");
        serde_json::from_str(&text).map_err(|e| BrowserlessError::Decode(e.to_string()))
    }
}
