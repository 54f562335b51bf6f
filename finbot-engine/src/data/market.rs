//! Market snapshot acquisition.
//!
//! The quote is fetched first and decides availability. Profile, metrics,
//! recommendations and price target are best effort: a failure leaves the
//! corresponding snapshot fields absent.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use finbot_common::MarketSourceConfig;

use crate::clock::Clock;
use crate::financials::{MarketSnapshot, MetricNormalizer, ProviderPayload};

use super::backoff::BackoffPolicy;
use super::cache::CacheStore;
use super::fetcher::RateLimitedFetcher;
use super::finnhub::FinnhubAdapter;
use super::rate_limiter::CallThrottle;
use super::{MarketDataSource, MarketEndpoint, SourceError};

pub struct MarketDataService {
    source: Arc<dyn MarketDataSource>,
    fetcher: RateLimitedFetcher,
    normalizer: MetricNormalizer,
    ttl_secs: u64,
}

impl MarketDataService {
    pub fn new(source: Arc<dyn MarketDataSource>, fetcher: RateLimitedFetcher, ttl_secs: u64) -> Self {
        Self {
            source,
            fetcher,
            normalizer: MetricNormalizer::new(),
            ttl_secs,
        }
    }

    /// Finnhub-backed service.
    pub fn from_config(
        config: &MarketSourceConfig,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let source: Arc<dyn MarketDataSource> = Arc::new(FinnhubAdapter::from_config(config));
        let fetcher = RateLimitedFetcher::new(
            source.name(),
            cache,
            CallThrottle::new(source.name(), Duration::from_millis(config.call_delay_ms)),
            BackoffPolicy::from_market_config(config),
            clock,
        );
        Self::new(source, fetcher, config.cache_ttl_secs)
    }

    fn cache_key(&self, endpoint: MarketEndpoint, symbol: &str) -> String {
        format!("{}:{}:{}", self.source.name(), endpoint.as_str(), symbol)
    }

    async fn fetch(&self, endpoint: MarketEndpoint, symbol: &str) -> Result<Value, SourceError> {
        let key = self.cache_key(endpoint, symbol);
        self.fetcher
            .fetch_with_cache(&key, self.ttl_secs, || self.source.fetch(endpoint, symbol))
            .await
    }

    /// Best-effort fetch. An auth failure here is an entitlement gap on one
    /// endpoint and never disables the source.
    async fn fetch_optional(&self, endpoint: MarketEndpoint, symbol: &str) -> Value {
        let key = self.cache_key(endpoint, symbol);
        let result = self
            .fetcher
            .fetch_optional_with_cache(&key, self.ttl_secs, || self.source.fetch(endpoint, symbol))
            .await;
        match result {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    symbol,
                    endpoint = endpoint.as_str(),
                    error = %e,
                    "Optional market data unavailable"
                );
                Value::Null
            }
        }
    }

    /// Fetch and normalize everything known about `symbol`.
    ///
    /// Fails when the quote cannot be fetched or carries no price.
    pub async fn snapshot(&self, symbol: &str, currency: &str) -> Result<MarketSnapshot, SourceError> {
        let quote = self.fetch(MarketEndpoint::Quote, symbol).await?;

        let has_price = quote
            .get("c")
            .and_then(Value::as_f64)
            .is_some_and(|c| c != 0.0);
        if !has_price {
            return Err(SourceError::DataNotAvailable(format!(
                "no quote for {}",
                symbol
            )));
        }

        let payload = ProviderPayload {
            symbol: symbol.to_string(),
            currency: currency.to_string(),
            quote,
            profile: self.fetch_optional(MarketEndpoint::Profile, symbol).await,
            metrics: self.fetch_optional(MarketEndpoint::Metrics, symbol).await,
            recommendations: self
                .fetch_optional(MarketEndpoint::Recommendations, symbol)
                .await,
            price_target: self.fetch_optional(MarketEndpoint::PriceTarget, symbol).await,
        };

        let snapshot = self.normalizer.normalize(&payload);
        debug!(
            symbol,
            name = %snapshot.profile.name,
            price = ?snapshot.price,
            "Market snapshot ready"
        );
        Ok(snapshot)
    }

    pub fn fetcher(&self) -> &RateLimitedFetcher {
        &self.fetcher
    }
}
