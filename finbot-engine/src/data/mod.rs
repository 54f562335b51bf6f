//! Data acquisition for tracked securities.
//!
//! # Data Sources
//! - **Finnhub**: quote, profile, fundamentals, analyst recommendations and
//!   price targets, keyed by ticker. Requires a token.
//! - **SEC EDGAR**: XBRL company facts and the submissions index, keyed by
//!   ten-digit CIK. Requires a descriptive User-Agent.
//!
//! Each source sits behind its own [`RateLimitedFetcher`], sharing one
//! [`CacheStore`].

mod backoff;
mod cache;
mod edgar;
mod fetcher;
mod filings;
mod finnhub;
mod market;
mod provider;
mod rate_limiter;

pub use backoff::{BackoffPolicy, RetryState};
pub use cache::{CacheEntry, CacheStats, CacheStore, MemoryCache};
pub use edgar::EdgarAdapter;
pub use fetcher::RateLimitedFetcher;
pub use filings::FilingsService;
pub use finnhub::FinnhubAdapter;
pub use market::MarketDataService;
pub use provider::{FilingsEndpoint, FilingsSource, MarketDataSource, MarketEndpoint, SourceError};
pub use rate_limiter::CallThrottle;

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

use finbot_common::validation::is_valid_cik;
use finbot_common::TrackedEntityConfig;

// ============================================================================
// Core Data Types
// ============================================================================

/// SEC Central Index Key, ten ASCII digits, zero-padded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilerId(String);

impl FilerId {
    /// Validate a filer id. Malformed ids never reach the network.
    pub fn parse(raw: &str) -> Result<Self, SourceError> {
        let trimmed = raw.trim();
        if is_valid_cik(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(SourceError::InvalidRequest(format!(
                "filer id must be ten digits, got '{}'",
                raw
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Without leading zeros, as used in archive paths.
    pub fn unpadded(&self) -> &str {
        let stripped = self.0.trim_start_matches('0');
        if stripped.is_empty() {
            "0"
        } else {
            stripped
        }
    }
}

impl fmt::Display for FilerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A security on the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub name: String,
    pub ticker: String,
    /// Absent for ETFs and non-SEC issuers
    pub filer_id: Option<FilerId>,
    pub currency: String,
    pub venue: String,
}

impl TrackedEntity {
    pub fn new(name: impl Into<String>, ticker: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ticker: ticker.into(),
            filer_id: None,
            currency: currency.into(),
            venue: "US".to_string(),
        }
    }

    pub fn with_filer_id(mut self, filer_id: FilerId) -> Self {
        self.filer_id = Some(filer_id);
        self
    }

    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = venue.into();
        self
    }

    /// Entity for a ticker that is not on the roster: USD, no filings.
    pub fn ad_hoc(ticker: &str) -> Self {
        let ticker = ticker.trim().to_uppercase();
        Self::new(ticker.clone(), ticker, "USD")
    }

    pub fn from_config(config: &TrackedEntityConfig) -> Result<Self, SourceError> {
        let mut entity = Self::new(&config.name, &config.ticker, &config.currency)
            .with_venue(&config.market);
        if let Some(cik) = &config.cik {
            entity.filer_id = Some(FilerId::parse(cik)?);
        }
        Ok(entity)
    }
}

/// Build the roster from configuration.
///
/// An entry with a malformed filer id stays on the roster without filings;
/// the problem is logged once here.
pub fn roster_from_config(entities: &[TrackedEntityConfig]) -> Vec<TrackedEntity> {
    entities
        .iter()
        .map(|config| match TrackedEntity::from_config(config) {
            Ok(entity) => entity,
            Err(e) => {
                error!(
                    ticker = %config.ticker,
                    error = %e,
                    "Invalid filer id, filings disabled for this entity"
                );
                TrackedEntity::new(&config.name, &config.ticker, &config.currency)
                    .with_venue(&config.market)
            }
        })
        .collect()
}
