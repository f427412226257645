use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::parse::{clean_text, is_valid_handle, parse_count};
use super::session::StealthSessionManager;
use crate::common::PipelineError;
use crate::kernel::BaseProfileScraper;

/// Fields read off a creator's profile page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedProfile {
    pub username: String,
    pub bio: Option<String>,
    pub follower_count: i64,
    pub following_count: i64,
    pub total_likes: i64,
    pub video_count: i64,
    pub avatar_url: Option<String>,
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next()
}

fn text_of(document: &Html, selector: &str) -> Option<String> {
    select_first(document, selector).and_then(|el| clean_text(&el.text().collect::<String>()))
}

fn count_of(document: &Html, selector: &str) -> i64 {
    text_of(document, selector).map(|t| parse_count(&t)).unwrap_or(0)
}

fn avatar_of(document: &Html) -> Option<String> {
    let el = select_first(document, r#"[data-e2e="user-avatar"]"#)?;
    if el.value().name() == "img" {
        return el.value().attr("src").map(str::to_string);
    }
    let img = Selector::parse("img").ok()?;
    el.select(&img)
        .next()
        .and_then(|i| i.value().attr("src"))
        .map(str::to_string)
}

/// Read a profile out of rendered HTML.
///
/// Every field except the handle is optional; a page without the handle is
/// not a profile page and yields `ExtractionFailure`.
pub fn extract_profile(html: &str) -> Result<ScrapedProfile, PipelineError> {
    let document = Html::parse_document(html);

    let username = text_of(&document, r#"[data-e2e="user-title"]"#)
        .map(|u| u.trim_start_matches('@').to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| PipelineError::ExtractionFailure("Profile page has no username".to_string()))?;

    let video_count = Selector::parse(r#"[data-e2e="user-post-item"]"#)
        .map(|s| document.select(&s).count() as i64)
        .unwrap_or(0);

    Ok(ScrapedProfile {
        username,
        bio: text_of(&document, r#"[data-e2e="user-bio"]"#),
        follower_count: count_of(&document, r#"[data-e2e="followers-count"]"#),
        following_count: count_of(&document, r#"[data-e2e="following-count"]"#),
        total_likes: count_of(&document, r#"[data-e2e="likes-count"]"#),
        video_count,
        avatar_url: avatar_of(&document),
    })
}

/// Opens `{base}/@{handle}` in a stealth session and extracts the profile.
pub struct ProfileScraper {
    sessions: Arc<StealthSessionManager>,
    base_url: String,
}

impl ProfileScraper {
    pub fn new(sessions: Arc<StealthSessionManager>) -> Self {
        Self {
            sessions,
            base_url: super::PLATFORM_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn profile_url(&self, handle: &str) -> String {
        format!("{}/@{}", self.base_url.trim_end_matches('/'), handle.trim_start_matches('@'))
    }
}

#[async_trait]
impl BaseProfileScraper for ProfileScraper {
    async fn scrape_profile(&self, handle: &str) -> Result<ScrapedProfile, PipelineError> {
        if !is_valid_handle(handle.trim_start_matches('@')) {
            return Err(PipelineError::Validation(format!("invalid handle {:?}", handle)));
        }
        let url = self.profile_url(handle);
        let mut session = self.sessions.open(&format!("profile-{}", handle)).await?;

        let result = async {
            session.goto(&url).await?;
            session.ensure_navigable().await?;
            let html = session.content().await?;
            extract_profile(&html)
        }
        .await;

        self.sessions.close(session).await;

        match &result {
            Ok(profile) => info!(
                handle = %handle,
                followers = profile.follower_count,
                videos = profile.video_count,
                "Profile scraped"
            ),
            Err(e) => debug!(handle = %handle, error = %e, "Profile scrape failed"),
        }
        result
    }
}
