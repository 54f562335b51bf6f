//! Finnhub market data adapter.
//!
//! Every endpoint is a GET with `symbol` and `token` query parameters.
//! API docs: https://finnhub.io/docs/api

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use finbot_common::MarketSourceConfig;

use super::provider::{map_transport_error, read_json};
use super::{MarketDataSource, MarketEndpoint, SourceError};

pub struct FinnhubAdapter {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl FinnhubAdapter {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn from_config(config: &MarketSourceConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            config.token.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn token(&self) -> Result<&str, SourceError> {
        self.token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SourceError::Auth("No Finnhub API token configured".into()))
    }
}

#[async_trait]
impl MarketDataSource for FinnhubAdapter {
    fn name(&self) -> &'static str {
        "finnhub"
    }

    async fn fetch(&self, endpoint: MarketEndpoint, symbol: &str) -> Result<Value, SourceError> {
        if symbol.trim().is_empty() {
            return Err(SourceError::InvalidRequest("empty symbol".into()));
        }
        let token = self.token()?;
        let url = format!("{}{}", self.base_url, endpoint.path());

        debug!(endpoint = endpoint.as_str(), symbol, "Calling Finnhub API");

        let mut request = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("token", token)]);
        if endpoint == MarketEndpoint::Metrics {
            request = request.query(&[("metric", "all")]);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        read_json(self.name(), &format!("{} {}", endpoint.as_str(), symbol), response).await
    }
}
