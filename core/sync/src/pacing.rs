//! Pacing policy: bounded random delays between remote calls.

use std::time::Duration;
use tokio::time::sleep;

/// Throttling policy awaited between consecutive remote calls.
///
/// Each pause is drawn uniformly from `[min, max]` so a pass never hits the
/// remote at full rate, while staying unpredictable enough not to line up
/// with other periodic load. Substitute [`Pacing::none`] in tests for
/// deterministic, delay-free runs.
#[derive(Debug, Clone)]
pub struct Pacing {
    min: Duration,
    max: Duration,
}

impl Pacing {
    /// Uniform random delay between `min` and `max`.
    ///
    /// Swapped bounds are reordered rather than rejected.
    pub fn between(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// No delay at all.
    pub fn none() -> Self {
        Self::between(Duration::ZERO, Duration::ZERO)
    }

    /// Smallest possible pause.
    pub fn min(&self) -> Duration {
        self.min
    }

    /// Largest possible pause.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Wait out one randomly drawn delay.
    pub async fn pause(&self) {
        if self.max.is_zero() {
            return;
        }
        let span = self.max - self.min;
        let delay = self.min + span.mul_f64(rand::random::<f64>());
        sleep(delay).await;
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::between(Duration::from_millis(100), Duration::from_millis(500))
    }
}
