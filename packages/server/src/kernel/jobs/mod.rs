//! Queue and worker infrastructure for discovery jobs.
//!
//! - [`PostgresDiscoveryQueue`] - database-backed delivery queue with retry/backoff
//! - [`DiscoveryWorker`] - long-running consumer driven by a [`ConsumptionStrategy`]
//! - [`DiscoveryMessage`] - what travels through the queue
//!
//! Business logic stays in `domains::discovery`; it plugs in through
//! [`DiscoveryJobHandler`].

mod message;
mod queue;
mod worker;

pub use message::DiscoveryMessage;
pub use queue::{notify_enqueued, BaseDiscoveryQueue, Delivery, PostgresDiscoveryQueue, RetryPolicy};
pub use worker::{
    new_worker_id, ConsumptionStrategy, DiscoveryJobHandler, DiscoveryWorker, JobOutcome, PollStrategy,
    PushStrategy,
};
