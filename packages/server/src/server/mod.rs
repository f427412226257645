// HTTP front door (Axum)
pub mod app;
pub mod routes;

pub use app::*;
