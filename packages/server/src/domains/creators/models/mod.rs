pub mod creator_profile;

pub use creator_profile::CreatorProfile;
