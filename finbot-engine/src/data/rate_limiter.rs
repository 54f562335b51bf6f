//! Minimum-spacing throttle for outbound calls.
//!
//! Every call through a throttle waits until at least `min_interval` has
//! passed since the previous call started. The lock is held across the wait,
//! so concurrent callers are serialized and the spacing holds globally.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::clock::Clock;

#[derive(Debug)]
pub struct CallThrottle {
    /// Name for logging
    name: String,
    min_interval: Duration,
    last_call: Mutex<Option<DateTime<Utc>>>,
}

impl CallThrottle {
    pub fn new(name: impl Into<String>, min_interval: Duration) -> Self {
        Self {
            name: name.into(),
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Throttle from a millisecond spacing.
    pub fn from_millis(name: impl Into<String>, millis: u64) -> Self {
        Self::new(name, Duration::from_millis(millis))
    }

    /// Wait for the next call slot and claim it.
    pub async fn acquire(&self, clock: &dyn Clock) {
        let mut last = self.last_call.lock().await;

        if let Some(prev) = *last {
            let elapsed = (clock.now() - prev).to_std().unwrap_or(Duration::ZERO);
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(
                    throttle = %self.name,
                    wait_ms = wait.as_millis() as u64,
                    "Spacing outbound call"
                );
                clock.sleep(wait).await;
            }
        }

        *last = Some(clock.now());
    }
}

// ============================================================================
// Tests
// ============================================================================
