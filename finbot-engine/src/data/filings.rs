//! Filings acquisition: XBRL company facts and the recent filings index.

use std::sync::Arc;
use std::time::Duration;

use finbot_common::FilingsSourceConfig;

use crate::clock::Clock;
use crate::financials::{parse_recent_filings, CanonicalFinancials, CompanyFacts, ConceptResolver, RecentFiling};

use super::backoff::BackoffPolicy;
use super::cache::CacheStore;
use super::edgar::EdgarAdapter;
use super::fetcher::RateLimitedFetcher;
use super::rate_limiter::CallThrottle;
use super::{FilerId, FilingsEndpoint, FilingsSource, SourceError};

pub struct FilingsService {
    source: Arc<dyn FilingsSource>,
    fetcher: RateLimitedFetcher,
    resolver: ConceptResolver,
    ttl_secs: u64,
    recent_count: usize,
    archive_base_url: String,
}

impl FilingsService {
    pub fn new(
        source: Arc<dyn FilingsSource>,
        fetcher: RateLimitedFetcher,
        ttl_secs: u64,
        recent_count: usize,
        archive_base_url: impl Into<String>,
    ) -> Self {
        Self {
            source,
            fetcher,
            resolver: ConceptResolver::new(),
            ttl_secs,
            recent_count,
            archive_base_url: archive_base_url.into(),
        }
    }

    /// EDGAR-backed service.
    pub fn from_config(
        config: &FilingsSourceConfig,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let source: Arc<dyn FilingsSource> = Arc::new(EdgarAdapter::from_config(config));
        let fetcher = RateLimitedFetcher::new(
            source.name(),
            cache,
            CallThrottle::new(source.name(), Duration::from_millis(config.call_delay_ms)),
            BackoffPolicy::default(),
            clock,
        );
        Self::new(
            source,
            fetcher,
            config.cache_ttl_secs,
            config.recent_filings,
            config.archive_base_url.clone(),
        )
    }

    async fn fetch(&self, endpoint: FilingsEndpoint, filer: &FilerId) -> Result<serde_json::Value, SourceError> {
        let key = format!("{}:{}:{}", self.source.name(), endpoint.as_str(), filer);
        self.fetcher
            .fetch_with_cache(&key, self.ttl_secs, || self.source.fetch(endpoint, filer))
            .await
    }

    /// Canonical financials resolved from the filer's XBRL facts.
    pub async fn financials(&self, filer: &FilerId) -> Result<CanonicalFinancials, SourceError> {
        let raw = self.fetch(FilingsEndpoint::CompanyFacts, filer).await?;
        let facts = CompanyFacts::from_json(&raw)?;
        Ok(self.resolver.resolve_all(&facts, filer.as_str()))
    }

    /// Most recent 10-K/10-Q/8-K filings.
    pub async fn recent_filings(&self, filer: &FilerId) -> Result<Vec<RecentFiling>, SourceError> {
        let raw = self.fetch(FilingsEndpoint::Submissions, filer).await?;
        parse_recent_filings(&raw, filer, &self.archive_base_url, self.recent_count)
    }

    pub fn fetcher(&self) -> &RateLimitedFetcher {
        &self.fetcher
    }
}
