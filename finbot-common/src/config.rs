//! Configuration management for FinBot services.
//!
//! All FinBot services share a single configuration file at `~/.finbot/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (see below)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `FINNHUB_API_KEY` → market.token
//! - `ANTHROPIC_API_KEY` → narrative.api_key
//! - `FINBOT_LOG_LEVEL` → observability.log_level
//! - `FINBOT_LOG_FORMAT` → observability.log_format
//! - `FINBOT_HISTORY_PATH` → schedule.history_path
//! - `FINBOT_INTERVAL_MINUTES` → schedule.interval_minutes
//! - `FINBOT_SEC_USER_AGENT` → filings.user_agent

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".finbot"),
        |dirs| dirs.home_dir().join(".finbot"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// JSON Schema reference
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Market data source (Finnhub)
    #[serde(default)]
    pub market: MarketSourceConfig,

    /// Regulatory filings source (SEC EDGAR)
    #[serde(default)]
    pub filings: FilingsSourceConfig,

    /// Narrative generation service
    #[serde(default)]
    pub narrative: NarrativeConfig,

    /// Periodic refresh schedule
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Tracked roster
    #[serde(default = "default_entities")]
    pub entities: Vec<TrackedEntityConfig>,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::with_defaults());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults including the built-in roster.
    ///
    /// `Default` leaves `entities` empty; serde fills it from `default_entities`
    /// when the field is missing, so this keeps both paths consistent.
    pub fn with_defaults() -> Self {
        Self {
            entities: default_entities(),
            ..Self::default()
        }
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("FINNHUB_API_KEY") {
            self.market.token = Some(token);
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            self.narrative.api_key = Some(key);
        }
        if let Ok(level) = std::env::var("FINBOT_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("FINBOT_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Ok(path) = std::env::var("FINBOT_HISTORY_PATH") {
            self.schedule.history_path = Some(path);
        }
        if let Ok(minutes) = std::env::var("FINBOT_INTERVAL_MINUTES") {
            if let Ok(m) = minutes.parse() {
                self.schedule.interval_minutes = m;
            }
        }
        if let Ok(agent) = std::env::var("FINBOT_SEC_USER_AGENT") {
            self.filings.user_agent = agent;
        }
    }

    /// Resolved history file path (`~` expanded).
    pub fn history_path(&self) -> PathBuf {
        match &self.schedule.history_path {
            Some(p) => PathBuf::from(shellexpand::tilde(p).into_owned()),
            None => config_dir().join("sent_messages.json"),
        }
    }

    /// Find a roster entry by ticker (case-insensitive).
    pub fn find_entity(&self, ticker: &str) -> Option<&TrackedEntityConfig> {
        self.entities
            .iter()
            .find(|e| e.ticker.eq_ignore_ascii_case(ticker))
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets forced to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Data Sources
// ============================================================================

/// Finnhub market data source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSourceConfig {
    /// API base URL
    #[serde(default = "default_market_base_url")]
    pub base_url: String,

    /// API token (sent as the `token` query parameter)
    #[serde(default)]
    pub token: Option<String>,

    /// Minimum spacing between outbound calls, in milliseconds.
    /// Free tier allows 60 requests/minute.
    #[serde(default = "default_call_delay_ms")]
    pub call_delay_ms: u64,

    /// Sleep before the single retry after an HTTP 429
    #[serde(default = "default_rate_limit_backoff_secs")]
    pub rate_limit_backoff_secs: u64,

    /// Retries for transient network failures
    #[serde(default = "default_max_network_retries")]
    pub max_network_retries: u32,

    /// Base backoff for network retries (doubles per attempt)
    #[serde(default = "default_network_backoff_ms")]
    pub network_backoff_ms: u64,

    /// Cache lifetime for market payloads
    #[serde(default = "default_market_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// HTTP request timeout
    #[serde(default = "default_market_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MarketSourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_market_base_url(),
            token: None,
            call_delay_ms: default_call_delay_ms(),
            rate_limit_backoff_secs: default_rate_limit_backoff_secs(),
            max_network_retries: default_max_network_retries(),
            network_backoff_ms: default_network_backoff_ms(),
            cache_ttl_secs: default_market_cache_ttl_secs(),
            timeout_secs: default_market_timeout_secs(),
        }
    }
}

/// SEC EDGAR filings source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilingsSourceConfig {
    /// Base URL for the XBRL and submissions APIs
    #[serde(default = "default_filings_base_url")]
    pub base_url: String,

    /// Base URL for filing archive links
    #[serde(default = "default_archive_base_url")]
    pub archive_base_url: String,

    /// Descriptive client identification, required by SEC fair-access policy
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Minimum spacing between outbound calls, in milliseconds
    #[serde(default = "default_filings_call_delay_ms")]
    pub call_delay_ms: u64,

    /// Cache lifetime for filing payloads (filings change slowly)
    #[serde(default = "default_filings_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Number of recent filings listed per entity
    #[serde(default = "default_recent_filings")]
    pub recent_filings: usize,

    /// HTTP request timeout
    #[serde(default = "default_filings_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FilingsSourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_filings_base_url(),
            archive_base_url: default_archive_base_url(),
            user_agent: default_user_agent(),
            call_delay_ms: default_filings_call_delay_ms(),
            cache_ttl_secs: default_filings_cache_ttl_secs(),
            recent_filings: default_recent_filings(),
            timeout_secs: default_filings_timeout_secs(),
        }
    }
}

// ============================================================================
// Narrative Generation
// ============================================================================

/// Narrative generation service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeConfig {
    /// Enable narrative commentary (also requires an API key)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Messages API endpoint
    #[serde(default = "default_narrative_endpoint")]
    pub endpoint: String,

    /// API key
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier
    #[serde(default = "default_narrative_model")]
    pub model: String,

    /// Response token limit
    #[serde(default = "default_narrative_max_tokens")]
    pub max_tokens: u32,

    /// Output language for the commentary
    #[serde(default = "default_narrative_language")]
    pub language: String,

    /// HTTP request timeout
    #[serde(default = "default_narrative_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_narrative_endpoint(),
            api_key: None,
            model: default_narrative_model(),
            max_tokens: default_narrative_max_tokens(),
            language: default_narrative_language(),
            timeout_secs: default_narrative_timeout_secs(),
        }
    }
}

impl NarrativeConfig {
    /// Whether the service can actually be called.
    pub fn is_active(&self) -> bool {
        self.enabled && self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

// ============================================================================
// Schedule
// ============================================================================

/// Periodic refresh schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Minutes between refresh cycles (one entity per cycle)
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// History file path (defaults to `~/.finbot/sent_messages.json`)
    #[serde(default)]
    pub history_path: Option<String>,

    /// Fixed RNG seed for entity selection (entropy when absent)
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            history_path: None,
            seed: None,
        }
    }
}

// ============================================================================
// Tracked Entities
// ============================================================================

/// One tracked security.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEntityConfig {
    /// Display name
    pub name: String,
    /// Market ticker (provider format, e.g. "CDR.WA")
    pub ticker: String,
    /// SEC CIK, ten digits zero-padded. None for ETFs and foreign issuers.
    #[serde(default)]
    pub cik: Option<String>,
    /// Reporting currency
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Market venue tag
    #[serde(default = "default_venue")]
    pub market: String,
}

impl TrackedEntityConfig {
    pub fn new(
        name: impl Into<String>,
        ticker: impl Into<String>,
        cik: Option<&str>,
        currency: impl Into<String>,
        market: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            ticker: ticker.into(),
            cik: cik.map(str::to_string),
            currency: currency.into(),
            market: market.into(),
        }
    }
}

/// Default roster.
pub fn default_entities() -> Vec<TrackedEntityConfig> {
    vec![
        TrackedEntityConfig::new("S&P 500 (SPY)", "SPY", None, "USD", "US"),
        TrackedEntityConfig::new("NVIDIA", "NVDA", Some("0001045810"), "USD", "US"),
        TrackedEntityConfig::new("Uber", "UBER", Some("0001543151"), "USD", "US"),
        // Warsaw listing, not an SEC filer
        TrackedEntityConfig::new("CD Projekt", "CDR.WA", None, "PLN", "WSE"),
    ]
}

// ============================================================================
// Defaults
// ============================================================================

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
fn default_true() -> bool {
    true
}
fn default_market_base_url() -> String {
    "https://finnhub.io/api/v1".into()
}
fn default_call_delay_ms() -> u64 {
    1200
}
fn default_rate_limit_backoff_secs() -> u64 {
    15
}
fn default_max_network_retries() -> u32 {
    2
}
fn default_network_backoff_ms() -> u64 {
    1000
}
fn default_market_cache_ttl_secs() -> u64 {
    25 * 60
}
fn default_market_timeout_secs() -> u64 {
    10
}
fn default_filings_base_url() -> String {
    "https://data.sec.gov".into()
}
fn default_archive_base_url() -> String {
    "https://www.sec.gov/Archives/edgar/data".into()
}
fn default_user_agent() -> String {
    "FinanceBot contact@financebot.pl".into()
}
fn default_filings_call_delay_ms() -> u64 {
    // SEC allows 10 requests/second
    100
}
fn default_filings_cache_ttl_secs() -> u64 {
    12 * 60 * 60
}
fn default_recent_filings() -> usize {
    3
}
fn default_filings_timeout_secs() -> u64 {
    20
}
fn default_narrative_endpoint() -> String {
    "https://api.anthropic.com/v1/messages".into()
}
fn default_narrative_model() -> String {
    "claude-sonnet-4-5".into()
}
fn default_narrative_max_tokens() -> u32 {
    1200
}
fn default_narrative_language() -> String {
    "English".into()
}
fn default_narrative_timeout_secs() -> u64 {
    60
}
fn default_interval_minutes() -> u64 {
    15
}
fn default_currency() -> String {
    "USD".into()
}
fn default_venue() -> String {
    "US".into()
}
