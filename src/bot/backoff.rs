use std::time::Duration;

/// Reconnect delay that doubles per failed cycle up to a cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Delay to wait before the next attempt.
    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record a failed or ended cycle.
    pub fn advance(&mut self) {
        self.current = self.current.saturating_mul(2).min(self.max);
    }

    /// Record a confirmed login.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
