//! Rate-limited, cache-backed fetcher.
//!
//! Wraps one source's raw calls with:
//! - cache lookup before any network activity
//! - global minimum spacing between outbound calls
//! - retry with backoff for rate limits and transient failures
//! - process-lifetime disablement after the source rejects credentials

use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::clock::Clock;

use super::backoff::{BackoffPolicy, RetryState};
use super::cache::{CacheEntry, CacheStore};
use super::rate_limiter::CallThrottle;
use super::SourceError;

/// What an auth failure means for the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthFailure {
    /// Credentials are bad: stop calling the source until restart
    DisableSource,
    /// Only this endpoint is off limits
    FailCall,
}

pub struct RateLimitedFetcher {
    /// Source name for logging and disablement messages
    name: String,
    cache: Arc<dyn CacheStore>,
    throttle: CallThrottle,
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
    disabled: AtomicBool,
    outbound_calls: AtomicU64,
}

impl RateLimitedFetcher {
    pub fn new(
        name: impl Into<String>,
        cache: Arc<dyn CacheStore>,
        throttle: CallThrottle,
        policy: BackoffPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            cache,
            throttle,
            policy,
            clock,
            disabled: AtomicBool::new(false),
            outbound_calls: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serve `key` from cache if live, else fetch and store it.
    ///
    /// Failures are never cached. An auth failure disables the source.
    pub async fn fetch_with_cache<F, Fut>(
        &self,
        key: &str,
        ttl_secs: u64,
        fetch_fn: F,
    ) -> Result<Value, SourceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value, SourceError>>,
    {
        self.cached(key, ttl_secs, AuthFailure::DisableSource, fetch_fn)
            .await
    }

    /// Like [`fetch_with_cache`](Self::fetch_with_cache), for endpoints the
    /// key may not be entitled to. An auth failure fails only this call.
    pub async fn fetch_optional_with_cache<F, Fut>(
        &self,
        key: &str,
        ttl_secs: u64,
        fetch_fn: F,
    ) -> Result<Value, SourceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value, SourceError>>,
    {
        self.cached(key, ttl_secs, AuthFailure::FailCall, fetch_fn)
            .await
    }

    /// Throttled, retried fetch that bypasses the cache.
    pub async fn fetch_direct<F, Fut>(&self, label: &str, fetch_fn: F) -> Result<Value, SourceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value, SourceError>>,
    {
        self.retrying(label, AuthFailure::DisableSource, fetch_fn)
            .await
    }

    async fn cached<F, Fut>(
        &self,
        key: &str,
        ttl_secs: u64,
        on_auth: AuthFailure,
        fetch_fn: F,
    ) -> Result<Value, SourceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value, SourceError>>,
    {
        if let Some(payload) = self.cache.get(key, self.clock.now()) {
            debug!(source = %self.name, key, "Cache hit");
            return Ok(payload);
        }

        let payload = self.retrying(key, on_auth, fetch_fn).await?;
        self.cache.put(CacheEntry::new(
            key,
            self.clock.now(),
            payload.clone(),
            ttl_secs,
        ));
        Ok(payload)
    }

    async fn retrying<F, Fut>(
        &self,
        label: &str,
        on_auth: AuthFailure,
        fetch_fn: F,
    ) -> Result<Value, SourceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value, SourceError>>,
    {
        if self.is_disabled() {
            return Err(SourceError::Disabled(self.name.clone()));
        }

        let mut state = RetryState::default();
        loop {
            self.throttle.acquire(self.clock.as_ref()).await;
            self.outbound_calls.fetch_add(1, Ordering::Relaxed);

            let err = match fetch_fn().await {
                Ok(payload) => return Ok(payload),
                Err(e) => e,
            };

            if err.is_auth() {
                match on_auth {
                    AuthFailure::DisableSource => {
                        if !self.disabled.swap(true, Ordering::SeqCst) {
                            error!(
                                source = %self.name,
                                error = %err,
                                "Credentials rejected, source disabled until restart"
                            );
                        }
                    }
                    AuthFailure::FailCall => {
                        warn!(
                            source = %self.name,
                            request = label,
                            error = %err,
                            "Endpoint not permitted for this key"
                        );
                    }
                }
                return Err(err);
            }

            match self.policy.next_delay(&mut state, &err) {
                Some(delay) => {
                    warn!(
                        source = %self.name,
                        request = label,
                        error = %err,
                        backoff_ms = delay.as_millis() as u64,
                        "Source call failed, retrying"
                    );
                    self.clock.sleep(delay).await;
                }
                None => {
                    debug!(source = %self.name, request = label, error = %err, "Giving up");
                    return Err(err);
                }
            }
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Outbound calls attempted so far (cache hits excluded).
    pub fn outbound_calls(&self) -> u64 {
        self.outbound_calls.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Tests
// ============================================================================
