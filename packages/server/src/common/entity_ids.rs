//! Typed ids for every persisted entity.

pub use super::id::Id;

// ============================================================================
// Entity marker types
// ============================================================================

/// A hashtag discovery run (`creator_discoveries` row).
pub struct Discovery;

/// A scraped creator profile.
pub struct Creator;

/// A user who connected their account through OAuth.
pub struct User;

/// A synced video belonging to a user.
pub struct Video;

// ============================================================================
// Type aliases
// ============================================================================

pub type DiscoveryJobId = Id<Discovery>;

pub type CreatorId = Id<Creator>;

pub type UserId = Id<User>;

pub type VideoId = Id<Video>;
