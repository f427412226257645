// Common types and utilities shared across the application

pub mod crypto;
pub mod entity_ids;
pub mod errors;
pub mod id;

pub use crypto::{IntegrityError, TokenCipher};
pub use entity_ids::*;
pub use errors::PipelineError;
pub use id::Id;
