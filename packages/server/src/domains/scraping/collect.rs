use std::collections::HashSet;

use async_trait::async_trait;
use tracing::debug;

use crate::common::PipelineError;

/// Something that exposes handles a page at a time and can be asked for more.
#[async_trait]
pub trait HandleSource: Send {
    /// Handles visible right now, in discovery order. May repeat earlier ones.
    async fn current_handles(&mut self) -> Result<Vec<String>, PipelineError>;

    /// Trigger loading of more content (scroll, next page).
    async fn load_more(&mut self) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectLimits {
    pub desired: usize,
    pub max_iterations: usize,
    /// Consecutive iterations without a new handle before giving up.
    pub stall_limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Reached,
    MaxIterations,
    Stalled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectOutcome {
    pub handles: Vec<String>,
    pub iterations: usize,
    pub stop: StopReason,
}

/// Merge handles from `source` until enough are found, the iteration cap is
/// hit, or `stall_limit` iterations in a row add nothing new.
///
/// Handles are compared case-insensitively and returned in the order first
/// seen, truncated to `desired`.
pub async fn collect_handles(
    source: &mut dyn HandleSource,
    limits: CollectLimits,
) -> Result<CollectOutcome, PipelineError> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut ordered: Vec<String> = Vec::new();
    let mut iterations = 0usize;
    let mut stalled = 0usize;

    let stop = loop {
        if ordered.len() >= limits.desired {
            break StopReason::Reached;
        }
        if iterations >= limits.max_iterations {
            break StopReason::MaxIterations;
        }

        let batch = source.current_handles().await?;
        iterations += 1;

        let mut fresh = 0usize;
        for handle in batch {
            if seen.insert(handle.to_lowercase()) {
                ordered.push(handle);
                fresh += 1;
            }
        }

        debug!(iteration = iterations, new = fresh, total = ordered.len(), "Collected handles");

        if fresh == 0 {
            stalled += 1;
            if stalled >= limits.stall_limit.max(1) {
                break StopReason::Stalled;
            }
        } else {
            stalled = 0;
        }

        if ordered.len() >= limits.desired {
            break StopReason::Reached;
        }
        if iterations >= limits.max_iterations {
            break StopReason::MaxIterations;
        }

        source.load_more().await?;
    };

    ordered.truncate(limits.desired);
    Ok(CollectOutcome {
        handles: ordered,
        iterations,
        stop,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Yields `per_step` new handles for the first `productive_steps` steps, then repeats itself.
    struct Scripted {
        step: usize,
        productive_steps: usize,
        per_step: usize,
        loads: usize,
    }

    impl Scripted {
        fn new(productive_steps: usize, per_step: usize) -> Self {
            Self {
                step: 0,
                productive_steps,
                per_step,
                loads: 0,
            }
        }
    }

    #[async_trait]
    impl HandleSource for Scripted {
        async fn current_handles(&mut self) -> Result<Vec<String>, PipelineError> {
            let visible_steps = (self.step + 1).min(self.productive_steps);
            Ok((0..visible_steps * self.per_step).map(|i| format!("h{}", i)).collect())
        }

        async fn load_more(&mut self) -> Result<(), PipelineError> {
            self.step += 1;
            self.loads += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn stops_after_stall_limit_without_new_handles() {
        let mut source = Scripted::new(3, 2);
        let limits = CollectLimits {
            desired: 100,
            max_iterations: 20,
            stall_limit: 5,
        };
        let out = collect_handles(&mut source, limits).await.unwrap();
        assert_eq!(out.stop, StopReason::Stalled);
        assert_eq!(out.iterations, 3 + 5);
        assert!(out.iterations < limits.max_iterations);
        assert_eq!(out.handles.len(), 6);
    }

    #[tokio::test]
    async fn stops_when_desired_reached_and_truncates() {
        let mut source = Scripted::new(10, 4);
        let limits = CollectLimits {
            desired: 6,
            max_iterations: 20,
            stall_limit: 5,
        };
        let out = collect_handles(&mut source, limits).await.unwrap();
        assert_eq!(out.stop, StopReason::Reached);
        assert_eq!(out.handles, vec!["h0", "h1", "h2", "h3", "h4", "h5"]);
        assert_eq!(out.iterations, 2);
    }

    #[tokio::test]
    async fn respects_iteration_cap() {
        let mut source = Scripted::new(100, 1);
        let limits = CollectLimits {
            desired: 100,
            max_iterations: 4,
            stall_limit: 5,
        };
        let out = collect_handles(&mut source, limits).await.unwrap();
        assert_eq!(out.stop, StopReason::MaxIterations);
        assert_eq!(out.iterations, 4);
        assert_eq!(source.loads, 3);
    }

    #[tokio::test]
    async fn zero_desired_does_no_work() {
        let mut source = Scripted::new(3, 2);
        let limits = CollectLimits {
            desired: 0,
            max_iterations: 20,
            stall_limit: 5,
        };
        let out = collect_handles(&mut source, limits).await.unwrap();
        assert!(out.handles.is_empty());
        assert_eq!(out.iterations, 0);
    }

    struct CaseVariants;

    #[async_trait]
    impl HandleSource for CaseVariants {
        async fn current_handles(&mut self) -> Result<Vec<String>, PipelineError> {
            Ok(vec!["Alice".into(), "alice".into(), "BOB".into()])
        }

        async fn load_more(&mut self) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dedupes_case_insensitively() {
        let limits = CollectLimits {
            desired: 10,
            max_iterations: 3,
            stall_limit: 1,
        };
        let out = collect_handles(&mut CaseVariants, limits).await.unwrap();
        assert_eq!(out.handles, vec!["Alice", "BOB"]);
        assert_eq!(out.stop, StopReason::Stalled);
    }
}
