//! Fixed latency for synthesized responses.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Default delay applied to every mock response.
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(300);

/// Delays completion of a computation by a fixed interval.
///
/// The delay lives inside the caller's future. Dropping that future (for
/// example when the client disconnects) drops the timer with it.
#[derive(Debug, Clone, Copy)]
pub struct LatencySimulator {
    delay: Duration,
}

impl LatencySimulator {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `computation`, then hold its result until the delay has elapsed.
    pub async fn apply<F: Future>(&self, computation: F) -> F::Output {
        let output = computation.await;
        if !self.delay.is_zero() {
            debug!(delay_ms = self.delay.as_millis() as u64, "Applying mock latency");
            tokio::time::sleep(self.delay).await;
        }
        output
    }
}

impl Default for LatencySimulator {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY)
    }
}
