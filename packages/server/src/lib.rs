// Creator Discovery Pipeline - core library
//
// Account sync against the platform API, hashtag discovery jobs processed by
// queue workers, and browser-driven extraction of creator profiles.
//
// Domains live in domains/*, infrastructure (stores, queue, browser, NATS)
// in kernel/, and the HTTP front door in server/.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
