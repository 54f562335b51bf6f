//! FinBot Engine Library
//!
//! Periodically picks one company from a configured roster, collects market
//! data and SEC filings for it, normalizes both into a canonical fact bundle,
//! optionally attaches a narrative, and hands the result to a report sink.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          finbot-engine                               │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────────┐  │
//! │  │  Scheduler   │──▶│ Orchestrator │──▶│ ReportSink (log/channel) │  │
//! │  │  + History   │   └──────┬───────┘   └──────────────────────────┘  │
//! │  └──────────────┘          │                                         │
//! │        ┌───────────────────┼───────────────────┐                     │
//! │        ▼                   ▼                   ▼                     │
//! │  ┌────────────┐   ┌────────────────┐   ┌──────────────┐              │
//! │  │ Finnhub    │   │ EDGAR          │   │ Narrative    │              │
//! │  │ Normalizer │   │ ConceptResolver│   │ (optional)   │              │
//! │  └────────────┘   └────────────────┘   └──────────────┘              │
//! │        └── RateLimitedFetcher (throttle, backoff, cache) ──┘         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod clock;
pub mod data;
pub mod financials;
pub mod narrative;
pub mod orchestrator;
pub mod report;
pub mod schedule;

use anyhow::Result;
use std::sync::Arc;
use finbot_common::config::Config;

use crate::orchestrator::Orchestrator;
use crate::report::{LogSink, ReportSink};

pub use crate::orchestrator::CycleOutcome;

/// Main engine service
pub struct FinBotService {
    orchestrator: Arc<Orchestrator>,
}

impl FinBotService {
    /// Create the service with reports written to the log.
    pub fn new(config: Config) -> Self {
        Self::with_sink(config, Arc::new(LogSink))
    }

    pub fn with_sink(config: Config, sink: Arc<dyn ReportSink>) -> Self {
        let orchestrator = Arc::new(Orchestrator::from_config(&config, sink));
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Run the refresh loop until Ctrl-C.
    pub async fn start(self) -> Result<()> {
        let orchestrator = self.orchestrator.clone();
        let refresh = tokio::spawn(async move {
            orchestrator.run(shutdown_signal()).await;
        });

        if let Err(e) = refresh.await {
            tracing::error!(error = %e, "Refresh loop task failed");
            return Err(e.into());
        }

        tracing::info!("FinBot engine stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
