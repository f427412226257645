//! Discovery domain - hashtag discovery jobs and their lifecycle

pub mod activities;
pub mod models;

pub use activities::{enqueue_discovery, DiscoveryProcessor, EnqueueDiscoveryInput, EnqueueResult};
pub use models::{DiscoveryJob, DiscoveryPayload, DiscoveryStatus};
