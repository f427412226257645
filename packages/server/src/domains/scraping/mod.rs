//! Browser-driven extraction: hashtag discovery and profile scraping.

pub mod collect;
pub mod detection;
pub mod embedded_state;
pub mod hashtag;
pub mod parse;
pub mod profile;
pub mod session;

pub use collect::{collect_handles, CollectLimits, CollectOutcome, HandleSource, StopReason};
pub use embedded_state::{AuxiliaryExtractor, AuxiliaryHandles, EmbeddedStateExtractor};
pub use hashtag::HashtagDiscoverer;
pub use parse::{is_valid_handle, is_valid_hashtag};
pub use profile::{extract_profile, ProfileScraper, ScrapedProfile};
pub use session::{StealthSession, StealthSessionManager};

pub const PLATFORM_BASE_URL: &str = "https://www.tiktok.com";
