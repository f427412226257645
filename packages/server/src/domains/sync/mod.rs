pub mod models;
pub mod service;

pub use models::{engagement_rate, UserProfile, VideoRecord, VideoUpsert};
pub use service::{SyncResult, SyncService, SYNC_VIDEO_COUNT};
