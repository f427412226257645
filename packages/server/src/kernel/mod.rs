//! Kernel module - infrastructure, dependency containers and test doubles.

pub mod browser;
pub mod deps;
pub mod jobs;
pub mod nats;
pub mod test_dependencies;
pub mod traits;

pub use browser::{BaseBrowser, BasePage, BrowserlessBrowser, ContextOptions};
pub use deps::{tiktok_api_factory, ServerDeps, WorkerDeps};
pub use nats::{connect_optional, NatsClientPublisher, NatsPublisher, PublishedMessage, TestNats};
pub use test_dependencies::TestDependencies;
pub use traits::*;
