pub mod discovery_job;

pub use discovery_job::*;
