//! Source abstraction for market and filings data.
//!
//! Adapters return raw JSON payloads; normalization and concept resolution
//! happen downstream so they stay pure and testable without a network.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::FilerId;

// ============================================================================
// Source Error
// ============================================================================

/// Errors from external data sources.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// Connection failure or timeout
    #[error("Network error: {0}")]
    Network(String),

    /// Credentials rejected (401/403)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// HTTP 429
    #[error("Rate limited")]
    RateLimited,

    /// Server-side failure (5xx)
    #[error("Source unavailable: HTTP {status}")]
    Unavailable { status: u16 },

    /// Any other non-success status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Body was not the JSON we expected
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Request rejected before it reached the network
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Nothing to report for this identifier
    #[error("Data not available: {0}")]
    DataNotAvailable(String),

    /// Source switched off after an authentication failure
    #[error("Source disabled: {0}")]
    Disabled(String),
}

impl SourceError {
    /// Transient failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Unavailable { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Errors caused by setup rather than upstream state.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::InvalidRequest(_) | Self::Disabled(_))
    }
}

// ============================================================================
// Endpoints
// ============================================================================

/// Market data endpoints, all keyed by ticker symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketEndpoint {
    Quote,
    Profile,
    Metrics,
    Recommendations,
    PriceTarget,
}

impl MarketEndpoint {
    pub const ALL: [MarketEndpoint; 5] = [
        Self::Quote,
        Self::Profile,
        Self::Metrics,
        Self::Recommendations,
        Self::PriceTarget,
    ];

    /// URL path relative to the API base.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Quote => "/quote",
            Self::Profile => "/stock/profile2",
            Self::Metrics => "/stock/metric",
            Self::Recommendations => "/stock/recommendation",
            Self::PriceTarget => "/stock/price-target",
        }
    }

    /// Short name used in cache keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Profile => "profile",
            Self::Metrics => "metrics",
            Self::Recommendations => "recommendations",
            Self::PriceTarget => "price_target",
        }
    }
}

/// Filings endpoints, keyed by filer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilingsEndpoint {
    /// Every XBRL fact the filer has reported
    CompanyFacts,
    /// Filing index with recent submissions
    Submissions,
}

impl FilingsEndpoint {
    pub fn path(&self, filer: &FilerId) -> String {
        match self {
            Self::CompanyFacts => format!("/api/xbrl/companyfacts/CIK{}.json", filer),
            Self::Submissions => format!("/submissions/CIK{}.json", filer),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompanyFacts => "companyfacts",
            Self::Submissions => "submissions",
        }
    }
}

// ============================================================================
// Source Traits
// ============================================================================

/// Market quotes and fundamentals, keyed by ticker.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Source name (e.g., "finnhub")
    fn name(&self) -> &'static str;

    /// Perform one GET. No caching, throttling or retries here.
    async fn fetch(&self, endpoint: MarketEndpoint, symbol: &str) -> Result<Value, SourceError>;
}

/// Regulatory filings, keyed by filer id.
#[async_trait]
pub trait FilingsSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, endpoint: FilingsEndpoint, filer: &FilerId) -> Result<Value, SourceError>;
}

// ============================================================================
// HTTP helpers shared by the adapters
// ============================================================================

/// Map a transport-level failure. The URL is stripped since it may carry a token.
pub(crate) fn map_transport_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Network("Request timeout".into())
    } else if e.is_connect() {
        SourceError::Network("Connection failed".into())
    } else {
        SourceError::Network(e.without_url().to_string())
    }
}

/// Map the status line and decode a JSON body.
pub(crate) async fn read_json(
    source: &str,
    what: &str,
    response: reqwest::Response,
) -> Result<Value, SourceError> {
    let status = response.status();
    debug!(source, what, status = status.as_u16(), "Source responded");

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(SourceError::Auth(format!(
            "{} rejected credentials (HTTP {})",
            source,
            status.as_u16()
        )));
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(SourceError::RateLimited);
    }

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(SourceError::DataNotAvailable(format!("{} not found", what)));
    }

    if status.is_server_error() {
        return Err(SourceError::Unavailable {
            status: status.as_u16(),
        });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SourceError::Http {
            status: status.as_u16(),
            message: finbot_common::util::truncate_with_ellipsis(&body, 200),
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| SourceError::Decode(e.without_url().to_string()))
}
