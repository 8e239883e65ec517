//! Time and randomness capabilities.
//!
//! The shipping delay and the shipment outcome are the only nondeterministic
//! inputs in the system; both hide behind traits so tests can force either.

use std::time::Duration;

use async_trait::async_trait;

/// One-shot delay capability.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Complete after `delay` has elapsed.
    async fn after(&self, delay: Duration);
}

/// Wall-clock scheduler backed by the tokio timer wheel.
#[derive(Debug, Default)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn after(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Scheduler that fires immediately, for tests that fast-forward time.
#[derive(Debug, Default)]
pub struct NoDelay;

#[async_trait]
impl Scheduler for NoDelay {
    async fn after(&self, _delay: Duration) {}
}

/// Source of the shipment outcome coin flip.
pub trait OutcomeSource: Send + Sync {
    fn draw(&self) -> bool;
}

/// Pseudorandom outcome, the production source.
#[derive(Debug, Default)]
pub struct RandomOutcome;

impl OutcomeSource for RandomOutcome {
    fn draw(&self) -> bool {
        rand::random()
    }
}

/// Fixed outcome, for deterministic tests of both branches.
#[derive(Debug)]
pub struct FixedOutcome(pub bool);

impl OutcomeSource for FixedOutcome {
    fn draw(&self) -> bool {
        self.0
    }
}
