use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;
use tracing::{info, warn};

use super::collect::{collect_handles, CollectLimits, HandleSource};
use super::embedded_state::{AuxiliaryExtractor, EmbeddedStateExtractor};
use super::parse::{extract_link_handles, is_valid_handle, is_valid_hashtag};
use super::session::{StealthSession, StealthSessionManager};
use crate::common::PipelineError;
use crate::kernel::BaseHashtagDiscoverer;

/// Finds creator handles on a hashtag listing page by scrolling until the
/// feed stops producing new ones.
pub struct HashtagDiscoverer {
    sessions: Arc<StealthSessionManager>,
    auxiliary: Arc<dyn AuxiliaryExtractor>,
    max_iterations: usize,
    stall_limit: usize,
    base_url: String,
}

impl HashtagDiscoverer {
    pub fn new(sessions: Arc<StealthSessionManager>) -> Self {
        let max_iterations = sessions.config().max_scrolls;
        let stall_limit = sessions.config().stall_limit;
        Self {
            sessions,
            auxiliary: Arc::new(EmbeddedStateExtractor),
            max_iterations,
            stall_limit,
            base_url: super::PLATFORM_BASE_URL.to_string(),
        }
    }

    pub fn with_auxiliary(mut self, auxiliary: Arc<dyn AuxiliaryExtractor>) -> Self {
        self.auxiliary = auxiliary;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn hashtag_url(&self, hashtag: &str) -> String {
        format!("{}/tag/{}", self.base_url.trim_end_matches('/'), hashtag)
    }
}

/// Both handle signals from the current page, links first.
fn handles_in_page(html: &str, auxiliary: &dyn AuxiliaryExtractor) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut handles = extract_link_handles(&document);

    let aux = auxiliary.extract(&document);
    if let Some(error) = aux.parse_error {
        warn!(error = %error, "Embedded state unreadable, using links only");
    }
    for handle in aux.handles {
        if is_valid_handle(&handle) && !handles.contains(&handle) {
            handles.push(handle);
        }
    }
    handles
}

struct PageHandleSource<'a> {
    session: &'a mut StealthSession,
    auxiliary: &'a dyn AuxiliaryExtractor,
}

#[async_trait]
impl HandleSource for PageHandleSource<'_> {
    async fn current_handles(&mut self) -> Result<Vec<String>, PipelineError> {
        let html = self.session.content().await?;
        Ok(handles_in_page(&html, self.auxiliary))
    }

    async fn load_more(&mut self) -> Result<(), PipelineError> {
        self.session.scroll().await
    }
}

#[async_trait]
impl BaseHashtagDiscoverer for HashtagDiscoverer {
    async fn discover(&self, hashtag: &str, desired: usize) -> Result<Vec<String>, PipelineError> {
        if !is_valid_hashtag(hashtag) {
            return Err(PipelineError::Validation(format!("invalid hashtag {:?}", hashtag)));
        }
        let url = self.hashtag_url(hashtag);
        let limits = CollectLimits {
            desired,
            max_iterations: self.max_iterations,
            stall_limit: self.stall_limit,
        };

        let mut session = self.sessions.open(&format!("tag-{}", hashtag)).await?;
        let result = async {
            session.goto(&url).await?;
            session.ensure_navigable().await?;
            let mut source = PageHandleSource {
                session: &mut session,
                auxiliary: self.auxiliary.as_ref(),
            };
            collect_handles(&mut source, limits).await
        }
        .await;
        self.sessions.close(session).await;

        let outcome = result?;
        info!(
            hashtag = %hashtag,
            found = outcome.handles.len(),
            iterations = outcome.iterations,
            stop = ?outcome.stop,
            "Hashtag discovery finished"
        );
        Ok(outcome.handles)
    }
}
