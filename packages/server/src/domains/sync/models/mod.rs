pub mod user_profile;
pub mod video;

pub use user_profile::UserProfile;
pub use video::{engagement_rate, VideoRecord, VideoUpsert};
