//! Narrative commentary over a fact bundle.
//!
//! The generator receives the canonical bundle as JSON inside the prompt and
//! returns opaque text. Errors are reported to the caller, which degrades the
//! bundle instead of dropping it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use finbot_common::util::sanitize_for_log;
use finbot_common::NarrativeConfig;

use crate::clock::Clock;
use crate::report::FactBundle;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Produces commentary text for a bundle.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(&self, facts: &FactBundle) -> Result<String>;
}

// ============================================================================
// Anthropic Messages API
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Client for the Anthropic Messages API.
pub struct AnthropicNarrator {
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    language: String,
    max_retries: u32,
    retry_backoff: Duration,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl AnthropicNarrator {
    /// `None` when the configuration is disabled or has no key.
    pub fn from_config(config: &NarrativeConfig, clock: Arc<dyn Clock>) -> Option<Self> {
        if !config.is_active() {
            return None;
        }
        let api_key = config.api_key.clone()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Some(Self {
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            language: config.language.clone(),
            max_retries: 1,
            retry_backoff: Duration::from_secs(2),
            client,
            clock,
        })
    }

    async fn send_request(&self, prompt: String) -> Result<String> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let mut last_error = None;

        for attempt in 1..=self.max_retries + 1 {
            match self.try_send(&request).await {
                Ok(text) => {
                    info!(model = %self.model, attempt, chars = text.len(), "Narrative generated");
                    return Ok(text);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_retries + 1,
                        error = %sanitize_for_log(&format!("{:#}", e)),
                        "Narrative request failed"
                    );
                    last_error = Some(e);

                    if attempt <= self.max_retries {
                        self.clock.sleep(self.retry_backoff).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Unknown error")))
    }

    async fn try_send(&self, request: &MessagesRequest<'_>) -> Result<String> {
        debug!(endpoint = %self.endpoint, model = %self.model, "Sending narrative request");

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send narrative request: {}", e.without_url()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Messages API error: HTTP {} - {}",
                status,
                finbot_common::util::truncate_with_ellipsis(&error_text, 300)
            );
        }

        let body: MessagesResponse = response
            .json()
            .await
            .context("Failed to parse Messages API response")?;

        let text: String = body
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            anyhow::bail!("Messages API returned no text");
        }
        Ok(text)
    }
}

#[async_trait]
impl NarrativeGenerator for AnthropicNarrator {
    async fn generate(&self, facts: &FactBundle) -> Result<String> {
        let prompt = build_prompt(facts, &self.language)?;
        self.send_request(prompt).await
    }
}

/// Prompt with the bundle embedded as JSON.
pub fn build_prompt(facts: &FactBundle, language: &str) -> Result<String> {
    let data = serde_json::to_string_pretty(facts).context("Failed to serialize fact bundle")?;
    let entity = &facts.entity;

    Ok(format!(
        r#"You are a CFA-qualified financial analyst. Write a concise, professional report in {language} based only on the data below. Do not add information that is not in the data and do not invent numbers. Percentages and margins are fractions (0.15 = 15%). Absent fields are unknown, not zero.

COMPANY: {name} ({ticker}) | Currency: {currency}

DATA (JSON):
```json
{data}
```

Use these headings:

**SUMMARY**
[2-3 sentences: the key results and trend]

**PROFITABILITY & REVENUE**
[Margins, growth, quality of earnings]

**BALANCE SHEET**
[Assets, debt, liquidity]

**CASH FLOW**
[Operating cash flow, capex, free cash flow: does the company generate cash?]

**RISKS**
[3-4 bullet points]

**OUTLOOK**
[Short- and medium-term view]

**VERDICT: [POSITIVE / NEUTRAL / NEGATIVE / SPECULATIVE]**
[Who is this company suitable for?]

Maximum 520 words. Not investment advice."#,
        language = language,
        name = entity.name,
        ticker = entity.ticker,
        currency = entity.currency,
        data = data,
    ))
}
