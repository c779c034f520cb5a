use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::shared::error::CollectionError;
use crate::shared::record::Collection;

/// Per-invocation context handed to a collector.
#[derive(Debug, Clone)]
pub struct CollectContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl CollectContext {
    pub fn new(deadline: Instant, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    /// Context expiring `timeout` from now, with no external cancellation.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(Instant::now() + timeout, CancellationToken::new())
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Collectors call this between units of work. Cancellation wins over
    /// an expired deadline.
    pub fn checkpoint(&self) -> Result<(), CollectionError> {
        if self.cancel.is_cancelled() {
            return Err(CollectionError::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(CollectionError::Timeout);
        }
        Ok(())
    }
}

/// A unit that gathers one category of host data.
///
/// Implementations may block on OS queries; the scheduler always runs them
/// on a blocking worker so they cannot stall other datasets' timers.
pub trait DataCollector: Send + 'static {
    fn collect(&mut self, ctx: &CollectContext) -> Result<Collection, CollectionError>;

    fn validate(&self) -> Result<(), CollectionError> {
        Ok(())
    }

    fn health_check(&self) -> bool {
        self.validate().is_ok()
    }
}

pub trait Validatable {
    fn validate(&self) -> Result<(), String>;
    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_passes_before_deadline() {
        let ctx = CollectContext::with_timeout(Duration::from_secs(5));
        assert!(ctx.checkpoint().is_ok());
        assert!(ctx.remaining() > Duration::from_secs(4));
    }

    #[test]
    fn checkpoint_times_out_after_deadline() {
        let ctx = CollectContext::new(Instant::now(), CancellationToken::new());
        assert!(matches!(ctx.checkpoint(), Err(CollectionError::Timeout)));
    }

    #[test]
    fn cancellation_takes_priority() {
        let token = CancellationToken::new();
        let ctx = CollectContext::new(Instant::now(), token.clone());
        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.checkpoint(), Err(CollectionError::Cancelled)));
    }
}
