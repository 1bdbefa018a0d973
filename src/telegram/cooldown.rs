//! Cooldown between sensitive requests.
//!
//! Telegram answers repeated login code requests with long flood waits, so
//! a new request is refused locally until a minimum interval has passed.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Enforces a minimum interval between operations without blocking.
#[derive(Debug)]
pub struct Cooldown {
    /// Minimum duration between allowed operations.
    min_interval: Duration,

    /// Last time an operation was performed.
    last_operation: Option<Instant>,
}

impl Cooldown {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_operation: None,
        }
    }

    #[must_use]
    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Returns the time remaining until the next operation is allowed.
    pub fn remaining(&self) -> Duration {
        self.last_operation.map_or(Duration::ZERO, |last| {
            self.min_interval.saturating_sub(last.elapsed())
        })
    }

    /// Checks if an operation is currently allowed.
    pub fn is_allowed(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Checks the cooldown, returning the remaining wait if it is still active.
    ///
    /// Does not mark the operation; call [`Cooldown::mark_used`] once it succeeded.
    pub fn check(&self) -> Result<(), Duration> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            Ok(())
        } else {
            debug!("Cooldown active for another {:?}", remaining);
            Err(remaining)
        }
    }

    /// Marks an operation as just performed.
    pub fn mark_used(&mut self) {
        self.last_operation = Some(Instant::now());
    }

    /// Resets the cooldown, allowing immediate operation.
    pub fn reset(&mut self) {
        self.last_operation = None;
    }
}
