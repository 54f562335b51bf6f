//! Report bundles and the sinks that receive them.
//!
//! The engine produces structured data only. Rendering for chat or any other
//! surface happens behind [`ReportSink`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::data::TrackedEntity;
use crate::financials::{CanonicalFinancials, MarketSnapshot, RecentFiling};

/// Outcome of the filings step for one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FilingsStatus {
    Resolved,
    /// Entity has no filer id
    Skipped,
    Unavailable { reason: String },
}

/// Everything known about one entity after a refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactBundle {
    pub entity: TrackedEntity,
    pub market: MarketSnapshot,
    pub financials: Option<CanonicalFinancials>,
    pub filings_status: FilingsStatus,
    pub recent_filings: Vec<RecentFiling>,
    pub generated_at: DateTime<Utc>,
}

/// Narrative commentary attached to a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NarrativeStatus {
    Generated { text: String },
    /// Service failed; bundle delivered without commentary
    Degraded { reason: String },
    /// No narrative service configured
    Disabled,
}

impl NarrativeStatus {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Generated { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportBundle {
    pub facts: FactBundle,
    pub narrative: NarrativeStatus,
}

/// Market data could not be obtained for the selected entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableNotice {
    pub entity: TrackedEntity,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportEvent {
    Bundle(Box<ReportBundle>),
    Unavailable(UnavailableNotice),
}

impl ReportEvent {
    pub fn ticker(&self) -> &str {
        match self {
            Self::Bundle(b) => &b.facts.entity.ticker,
            Self::Unavailable(n) => &n.entity.ticker,
        }
    }
}

/// Downstream consumer of reports.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, event: ReportEvent) -> Result<()>;
}

/// Writes reports to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ReportSink for LogSink {
    async fn deliver(&self, event: ReportEvent) -> Result<()> {
        match &event {
            ReportEvent::Bundle(bundle) => {
                let facts = &bundle.facts;
                info!(
                    ticker = %facts.entity.ticker,
                    name = %facts.market.profile.name,
                    price = ?facts.market.price,
                    currency = %facts.market.currency,
                    change_fraction = ?facts.market.change_fraction,
                    financials = facts.financials.is_some(),
                    recent_filings = facts.recent_filings.len(),
                    narrative = bundle.narrative.text().is_some(),
                    "Report ready"
                );
                if let Some(text) = bundle.narrative.text() {
                    debug!(ticker = %facts.entity.ticker, narrative = %text, "Narrative");
                }
                debug!(bundle = %serde_json::to_string(&facts)?, "Fact bundle");
            }
            ReportEvent::Unavailable(notice) => {
                warn!(
                    ticker = %notice.entity.ticker,
                    reason = %notice.reason,
                    "Market data unavailable"
                );
            }
        }
        Ok(())
    }
}

/// Forwards reports over a tokio channel to a rendering task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ReportEvent>,
}

impl ChannelSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ReportEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ReportSink for ChannelSink {
    async fn deliver(&self, event: ReportEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|e| anyhow::anyhow!("Report receiver dropped ({})", e.0.ticker()))
    }
}
