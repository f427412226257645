pub mod enqueue;
pub mod process_discovery;

pub use enqueue::{
    enqueue_discovery, identifier_for, normalize_hashtag, source_for, validate_limit, EnqueueDiscoveryInput,
    EnqueueResult, MAX_DISCOVERY_LIMIT,
};
pub use process_discovery::DiscoveryProcessor;
