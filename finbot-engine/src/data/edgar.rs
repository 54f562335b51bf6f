//! SEC EDGAR adapter.
//!
//! Serves the XBRL company-facts and submissions APIs. SEC requires a
//! descriptive User-Agent on every request and caps clients at ten requests
//! per second.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use finbot_common::FilingsSourceConfig;

use super::provider::{map_transport_error, read_json};
use super::{FilerId, FilingsEndpoint, FilingsSource, SourceError};

pub struct EdgarAdapter {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl EdgarAdapter {
    pub fn new(base_url: impl Into<String>, user_agent: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_agent: user_agent.into(),
        }
    }

    pub fn from_config(config: &FilingsSourceConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            config.user_agent.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl FilingsSource for EdgarAdapter {
    fn name(&self) -> &'static str {
        "edgar"
    }

    async fn fetch(&self, endpoint: FilingsEndpoint, filer: &FilerId) -> Result<Value, SourceError> {
        if self.user_agent.trim().is_empty() {
            return Err(SourceError::InvalidRequest(
                "SEC requests need a User-Agent".into(),
            ));
        }

        let url = format!("{}{}", self.base_url, endpoint.path(filer));
        debug!(endpoint = endpoint.as_str(), filer = %filer, "Calling EDGAR API");

        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(map_transport_error)?;

        read_json(
            self.name(),
            &format!("{} CIK{}", endpoint.as_str(), filer),
            response,
        )
        .await
    }
}
