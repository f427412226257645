pub mod models;
pub mod token_manager;

pub use models::Credential;
pub use token_manager::TokenManager;
