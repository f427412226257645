//! NATS publishing for pipeline notifications.
//!
//! Notifications are fire-and-forget: the queue table is the source of
//! truth, subscribers only get a heads-up that new work exists.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Subject announcing a newly enqueued discovery job.
pub const DISCOVERY_ENQUEUED_SUBJECT: &str = "discovery.enqueued";

/// A published message.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
}

#[async_trait]
pub trait NatsPublisher: Send + Sync {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()>;
}

/// Real NATS client publisher.
pub struct NatsClientPublisher {
    client: async_nats::Client,
}

impl NatsClientPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url).await?;
        Ok(Self::new(client))
    }
}

/// Connect when a URL is configured. A broker that cannot be reached is
/// logged and skipped; notifications are optional.
pub async fn connect_optional(url: Option<&str>) -> Option<Arc<dyn NatsPublisher>> {
    let url = url?;
    match NatsClientPublisher::connect(url).await {
        Ok(publisher) => {
            info!(url = %url, "Connected to NATS");
            Some(Arc::new(publisher))
        }
        Err(e) => {
            warn!(url = %url, error = %e, "NATS unavailable, enqueue notifications disabled");
            None
        }
    }
}

#[async_trait]
impl NatsPublisher for NatsClientPublisher {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.client.publish(subject, payload).await?;
        Ok(())
    }
}

/// Records publishes so tests can assert on them.
#[derive(Default)]
pub struct TestNats {
    published: RwLock<Vec<PublishedMessage>>,
}

impl TestNats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn messages_for_subject(&self, subject: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    pub fn publish_count(&self) -> usize {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl NatsPublisher for TestNats {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage { subject, payload });
        Ok(())
    }
}
