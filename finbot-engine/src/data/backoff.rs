//! Retry policy for source failures.
//!
//! - HTTP 429: sleep a fixed backoff, retry once.
//! - Network failures and 5xx: exponential backoff up to a bounded count.
//! - Everything else (auth, decode, 4xx, missing data): no retry.

use std::time::Duration;

use finbot_common::MarketSourceConfig;

use super::SourceError;

/// Backoff configuration for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Sleep before retrying a rate-limited call
    pub rate_limit_backoff: Duration,
    /// Retries allowed after a rate limit response
    pub rate_limit_retries: u32,
    /// Retries allowed for transient network failures
    pub max_network_retries: u32,
    /// First network backoff, doubled per attempt
    pub network_base_delay: Duration,
    /// Upper bound on a single network backoff
    pub network_max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            rate_limit_backoff: Duration::from_secs(15),
            rate_limit_retries: 1,
            max_network_retries: 2,
            network_base_delay: Duration::from_secs(1),
            network_max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn from_market_config(config: &MarketSourceConfig) -> Self {
        Self {
            rate_limit_backoff: Duration::from_secs(config.rate_limit_backoff_secs),
            max_network_retries: config.max_network_retries,
            network_base_delay: Duration::from_millis(config.network_backoff_ms),
            ..Self::default()
        }
    }

    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            rate_limit_retries: 0,
            max_network_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before the next attempt, or `None` to give up.
    ///
    /// Updates `state` so repeated calls respect the per-kind budgets.
    pub fn next_delay(&self, state: &mut RetryState, error: &SourceError) -> Option<Duration> {
        if error.is_rate_limited() {
            if state.rate_limited >= self.rate_limit_retries {
                return None;
            }
            state.rate_limited += 1;
            return Some(self.rate_limit_backoff);
        }

        if error.is_retryable() {
            if state.network >= self.max_network_retries {
                return None;
            }
            let delay = self.network_delay(state.network);
            state.network += 1;
            return Some(delay);
        }

        None
    }

    /// Backoff for the given zero-based network retry.
    pub fn network_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.network_base_delay
            .saturating_mul(factor)
            .min(self.network_max_delay)
    }
}

/// Retries consumed so far for one logical request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub rate_limited: u32,
    pub network: u32,
}
