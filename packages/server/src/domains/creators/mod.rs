pub mod models;

pub use models::CreatorProfile;
