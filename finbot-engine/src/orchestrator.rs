//! Refresh cycle orchestration.
//!
//! One cycle:
//!
//! ```text
//! select entity → market snapshot ─ok─→ filings (if filer id) → narrative → emit bundle ─┐
//!                        └─failed─→ emit unavailable notice ─────────────────────────────┤
//!                                                                       record history ←─┘
//! ```
//!
//! Only the market source can make a cycle "unavailable". Filings and
//! narrative failures degrade the bundle. History is recorded either way.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use finbot_common::util::sanitize_for_log;
use finbot_common::validation::MAX_INTERVAL_MINUTES;
use finbot_common::Config;

use crate::clock::{Clock, SystemClock};
use crate::data::{
    roster_from_config, CacheStore, FilerId, FilingsService, MarketDataService, MemoryCache,
    SourceError, TrackedEntity,
};
use crate::financials::{CanonicalFinancials, MarketSnapshot, RecentFiling};
use crate::narrative::{AnthropicNarrator, NarrativeGenerator};
use crate::report::{
    FactBundle, FilingsStatus, NarrativeStatus, ReportBundle, ReportEvent, ReportSink,
    UnavailableNotice,
};
use crate::schedule::{EntityState, HistoryStore, JsonHistoryStore, Scheduler, SchedulerHistory};

/// Result of one periodic cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Roster is empty
    Idle,
    Reported {
        ticker: String,
        financials: bool,
        narrative: bool,
    },
    Unavailable {
        ticker: String,
        reason: String,
    },
}

/// Filings lookup result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingsReport {
    pub financials: CanonicalFinancials,
    pub recent_filings: Vec<RecentFiling>,
}

/// Per-entity scheduling status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryOverview {
    pub name: String,
    pub ticker: String,
    pub last_sent: Option<DateTime<Utc>>,
    pub minutes_since: Option<i64>,
    pub eligible: bool,
}

/// Collaborators for [`Orchestrator::new`].
pub struct OrchestratorParts {
    pub roster: Vec<TrackedEntity>,
    pub market: MarketDataService,
    pub filings: FilingsService,
    pub cache: Arc<dyn CacheStore>,
    pub scheduler: Scheduler,
    pub history: Arc<dyn HistoryStore>,
    pub narrator: Option<Arc<dyn NarrativeGenerator>>,
    pub sink: Arc<dyn ReportSink>,
    pub clock: Arc<dyn Clock>,
    pub interval: Duration,
}

pub struct Orchestrator {
    roster: Vec<TrackedEntity>,
    market: MarketDataService,
    filings: FilingsService,
    cache: Arc<dyn CacheStore>,
    scheduler: Scheduler,
    history: Arc<dyn HistoryStore>,
    narrator: Option<Arc<dyn NarrativeGenerator>>,
    sink: Arc<dyn ReportSink>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl Orchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            roster: parts.roster,
            market: parts.market,
            filings: parts.filings,
            cache: parts.cache,
            scheduler: parts.scheduler,
            history: parts.history,
            narrator: parts.narrator,
            sink: parts.sink,
            clock: parts.clock,
            interval: parts.interval,
        }
    }

    /// Production wiring: Finnhub, EDGAR, JSON history, system clock.
    pub fn from_config(config: &Config, sink: Arc<dyn ReportSink>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let roster = roster_from_config(&config.entities);
        let interval = refresh_interval(config.schedule.interval_minutes);

        let narrator = AnthropicNarrator::from_config(&config.narrative, clock.clone())
            .map(|n| Arc::new(n) as Arc<dyn NarrativeGenerator>);
        if narrator.is_none() {
            info!("Narrative generation disabled (no API key or turned off)");
        }

        let history_path = config.history_path();
        info!(
            entities = roster.len(),
            interval_secs = interval.as_secs(),
            history = %history_path.display(),
            "Orchestrator configured"
        );

        Self::new(OrchestratorParts {
            scheduler: Scheduler::new(interval, roster.len(), config.schedule.seed),
            market: MarketDataService::from_config(&config.market, cache.clone(), clock.clone()),
            filings: FilingsService::from_config(&config.filings, cache.clone(), clock.clone()),
            history: Arc::new(JsonHistoryStore::new(history_path)),
            roster,
            cache,
            narrator,
            sink,
            clock,
            interval,
        })
    }

    // ========================================================================
    // Periodic cycle
    // ========================================================================

    /// Run one refresh cycle.
    ///
    /// Source failures never abort the cycle. The only error is a failure to
    /// persist history.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let now = self.clock.now();
        self.cache.clear_expired(now);

        let history = self.load_history().await.unwrap_or_else(|e| {
            warn!(error = %format!("{:#}", e), "Failed to load history, treating every entity as never sent");
            SchedulerHistory::new()
        });

        let Some((entity, reason)) = self.scheduler.select(&self.roster, &history, now) else {
            warn!("Roster is empty, nothing to refresh");
            return Ok(CycleOutcome::Idle);
        };

        info!(
            ticker = %entity.ticker,
            name = %entity.name,
            selection = ?reason,
            "Refresh cycle started"
        );

        let outcome = match self.market.snapshot(&entity.ticker, &entity.currency).await {
            Ok(market) => {
                let facts = self.gather(entity, market).await;
                let narrative = self.narrate(&facts).await;
                let outcome = CycleOutcome::Reported {
                    ticker: entity.ticker.clone(),
                    financials: facts.financials.is_some(),
                    narrative: narrative.text().is_some(),
                };
                self.emit(ReportEvent::Bundle(Box::new(ReportBundle { facts, narrative })))
                    .await;
                outcome
            }
            Err(e) => {
                if e.is_configuration() {
                    error!(ticker = %entity.ticker, error = %e, "Market source misconfigured");
                } else {
                    warn!(ticker = %entity.ticker, error = %e, "Market data unavailable");
                }
                let reason = e.to_string();
                self.emit(ReportEvent::Unavailable(UnavailableNotice {
                    entity: entity.clone(),
                    reason: reason.clone(),
                    at: self.clock.now(),
                }))
                .await;
                CycleOutcome::Unavailable {
                    ticker: entity.ticker.clone(),
                    reason,
                }
            }
        };

        self.record_history(&entity.ticker, self.clock.now())
            .await
            .with_context(|| format!("Failed to persist history for {}", entity.ticker))?;

        debug!(outcome = ?outcome, "Refresh cycle finished");
        Ok(outcome)
    }

    // History stores do blocking file I/O; keep it off the async workers.

    async fn load_history(&self) -> Result<SchedulerHistory> {
        let store = self.history.clone();
        let history = tokio::task::spawn_blocking(move || store.load())
            .await
            .context("History load task failed")??;
        Ok(history)
    }

    async fn record_history(&self, ticker: &str, at: DateTime<Utc>) -> Result<()> {
        let store = self.history.clone();
        let ticker = ticker.to_string();
        tokio::task::spawn_blocking(move || store.record(&ticker, at))
            .await
            .context("History write task failed")??;
        Ok(())
    }

    /// Run cycles on the configured interval until `shutdown` resolves.
    ///
    /// The first cycle runs immediately. A cycle in progress is allowed to
    /// finish; late ticks are delayed rather than bunched.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_secs = self.interval.as_secs(), "Refresh loop started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, refresh loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %format!("{:#}", e), "Refresh cycle failed");
                    }
                }
            }
        }
    }

    async fn gather(&self, entity: &TrackedEntity, market: MarketSnapshot) -> FactBundle {
        let (financials, filings_status, recent_filings) = match &entity.filer_id {
            None => {
                debug!(ticker = %entity.ticker, "No filer id, filings skipped");
                (None, FilingsStatus::Skipped, Vec::new())
            }
            Some(filer) => {
                let (financials, status) = match self.filings.financials(filer).await {
                    Ok(f) => (Some(f), FilingsStatus::Resolved),
                    Err(e) => {
                        warn!(ticker = %entity.ticker, filer = %filer, error = %e, "Filings unavailable");
                        (
                            None,
                            FilingsStatus::Unavailable {
                                reason: e.to_string(),
                            },
                        )
                    }
                };
                let recent = self.recent_filings_or_empty(filer).await;
                (financials, status, recent)
            }
        };

        FactBundle {
            entity: entity.clone(),
            market,
            financials,
            filings_status,
            recent_filings,
            generated_at: self.clock.now(),
        }
    }

    async fn recent_filings_or_empty(&self, filer: &FilerId) -> Vec<RecentFiling> {
        match self.filings.recent_filings(filer).await {
            Ok(recent) => recent,
            Err(e) => {
                warn!(filer = %filer, error = %e, "Recent filings unavailable");
                Vec::new()
            }
        }
    }

    async fn narrate(&self, facts: &FactBundle) -> NarrativeStatus {
        let Some(narrator) = &self.narrator else {
            return NarrativeStatus::Disabled;
        };
        match narrator.generate(facts).await {
            Ok(text) => NarrativeStatus::Generated { text },
            Err(e) => {
                let reason = sanitize_for_log(&format!("{:#}", e));
                warn!(ticker = %facts.entity.ticker, error = %reason, "Narrative unavailable, delivering without it");
                NarrativeStatus::Degraded { reason }
            }
        }
    }

    async fn emit(&self, event: ReportEvent) {
        let ticker = event.ticker().to_string();
        if let Err(e) = self.sink.deliver(event).await {
            warn!(ticker = %ticker, error = %e, "Report delivery failed");
        }
    }

    // ========================================================================
    // Ad-hoc lookups (no history update)
    // ========================================================================

    /// Roster entry for `ticker`, or an ad-hoc USD entity without filings.
    fn resolve_entity(&self, ticker: &str) -> TrackedEntity {
        let ticker = ticker.trim();
        self.roster
            .iter()
            .find(|e| e.ticker.eq_ignore_ascii_case(ticker))
            .cloned()
            .unwrap_or_else(|| TrackedEntity::ad_hoc(ticker))
    }

    pub async fn lookup_market(&self, ticker: &str) -> Result<MarketSnapshot, SourceError> {
        let entity = self.resolve_entity(ticker);
        self.market.snapshot(&entity.ticker, &entity.currency).await
    }

    /// Financials and recent filings for a filer id. Malformed ids are
    /// rejected without a network call.
    pub async fn lookup_filings(&self, filer_id: &str) -> Result<FilingsReport, SourceError> {
        let filer = FilerId::parse(filer_id)?;
        let financials = self.filings.financials(&filer).await?;
        let recent_filings = self.recent_filings_or_empty(&filer).await;
        Ok(FilingsReport {
            financials,
            recent_filings,
        })
    }

    /// Full bundle with narrative, as a cycle would build it.
    pub async fn full_report(&self, ticker: &str) -> Result<ReportBundle, SourceError> {
        let entity = self.resolve_entity(ticker);
        let market = self.market.snapshot(&entity.ticker, &entity.currency).await?;
        let facts = self.gather(&entity, market).await;
        let narrative = self.narrate(&facts).await;
        Ok(ReportBundle { facts, narrative })
    }

    pub fn roster(&self) -> &[TrackedEntity] {
        &self.roster
    }

    /// Last report time and eligibility for every roster entry.
    pub fn history_overview(&self) -> Result<Vec<HistoryOverview>> {
        let history = self.history.load().context("Failed to load history")?;
        let now = self.clock.now();

        Ok(self
            .roster
            .iter()
            .map(|entity| {
                let last_sent = history.last_sent(&entity.ticker);
                HistoryOverview {
                    name: entity.name.clone(),
                    ticker: entity.ticker.clone(),
                    last_sent,
                    minutes_since: last_sent.map(|t| (now - t).num_minutes()),
                    eligible: self.scheduler.state_of(last_sent, now) == EntityState::Eligible,
                }
            })
            .collect())
    }

    /// Run `fut` with a deadline; expiry counts as a network failure.
    pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, SourceError>
    where
        F: Future<Output = Result<T, SourceError>>,
    {
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Network(format!(
                "deadline of {}ms exceeded",
                deadline.as_millis()
            ))),
        }
    }

}

/// Configured minutes as a loop period, clamped to `1..=MAX_INTERVAL_MINUTES`.
fn refresh_interval(minutes: u64) -> Duration {
    Duration::from_secs(minutes.clamp(1, MAX_INTERVAL_MINUTES).saturating_mul(60))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::data::{
        BackoffPolicy, CallThrottle, FilingsEndpoint, FilingsSource, MarketDataSource,
        MarketEndpoint, RateLimitedFetcher,
    };
    use crate::financials::CanonicalMetric;
    use crate::report::ChannelSink;
    use crate::schedule::MemoryHistoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    const NVDA_CIK: &str = "0001045810";

    struct StubMarket {
        prices: HashMap<String, f64>,
        calls: AtomicU32,
    }

    impl StubMarket {
        fn with_prices(prices: &[(&str, f64)]) -> Self {
            Self {
                prices: prices.iter().map(|(t, p)| (t.to_string(), *p)).collect(),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl MarketDataSource for StubMarket {
        fn name(&self) -> &'static str {
            "stub-market"
        }

        async fn fetch(&self, endpoint: MarketEndpoint, symbol: &str) -> Result<Value, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match endpoint {
                MarketEndpoint::Quote => Ok(json!({
                    "c": self.prices.get(symbol).copied().unwrap_or(0.0),
                    "pc": 100.0
                })),
                MarketEndpoint::Profile => Ok(json!({ "name": format!("{} Inc", symbol) })),
                _ => Ok(json!({})),
            }
        }
    }

    struct StubFilings {
        facts: Result<Value, SourceError>,
        calls: AtomicU32,
    }

    impl StubFilings {
        fn ok() -> Self {
            Self {
                facts: Ok(json!({
                    "entityName": "NVIDIA CORP",
                    "facts": { "us-gaap": {
                        "Revenues": { "units": { "USD": [
                            { "val": 60922000000.0, "end": "2024-01-28", "form": "10-K", "accn": "0001045810-24-000029" }
                        ] } },
                        "NetIncomeLoss": { "units": { "USD": [
                            { "val": 29760000000.0, "end": "2024-01-28", "form": "10-K", "accn": "0001045810-24-000029" }
                        ] } }
                    } }
                })),
                calls: AtomicU32::new(0),
            }
        }

        fn failing(error: SourceError) -> Self {
            Self {
                facts: Err(error),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl FilingsSource for StubFilings {
        fn name(&self) -> &'static str {
            "stub-filings"
        }

        async fn fetch(&self, endpoint: FilingsEndpoint, _filer: &FilerId) -> Result<Value, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match endpoint {
                FilingsEndpoint::CompanyFacts => self.facts.clone(),
                FilingsEndpoint::Submissions => Ok(json!({
                    "filings": { "recent": {
                        "form": ["4", "10-K"],
                        "filingDate": ["2024-03-01", "2024-02-21"],
                        "accessionNumber": ["0001045810-24-000031", "0001045810-24-000029"]
                    } }
                })),
            }
        }
    }

    struct FixedNarrator(std::result::Result<String, String>);

    #[async_trait]
    impl NarrativeGenerator for FixedNarrator {
        async fn generate(&self, _facts: &FactBundle) -> Result<String> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(anyhow::anyhow!(e.clone())),
            }
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        events: mpsc::Receiver<ReportEvent>,
        history: Arc<MemoryHistoryStore>,
        clock: Arc<ManualClock>,
        market: Arc<StubMarket>,
        filings: Arc<StubFilings>,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn nvda() -> TrackedEntity {
        TrackedEntity::new("NVIDIA", "NVDA", "USD").with_filer_id(FilerId::parse(NVDA_CIK).unwrap())
    }

    fn fetcher(name: &str, cache: &Arc<dyn CacheStore>, clock: &Arc<ManualClock>) -> RateLimitedFetcher {
        RateLimitedFetcher::new(
            name,
            cache.clone(),
            CallThrottle::new(name, Duration::ZERO),
            BackoffPolicy::no_retry(),
            clock.clone(),
        )
    }

    fn harness(
        roster: Vec<TrackedEntity>,
        market: StubMarket,
        filings: StubFilings,
        narrator: Option<Arc<dyn NarrativeGenerator>>,
    ) -> Harness {
        let clock = Arc::new(ManualClock::new(t0()));
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let market = Arc::new(market);
        let filings = Arc::new(filings);
        let history = Arc::new(MemoryHistoryStore::new());
        let (sink, events) = ChannelSink::channel(8);
        let interval = Duration::from_secs(15 * 60);

        let orchestrator = Orchestrator::new(OrchestratorParts {
            scheduler: Scheduler::new(interval, roster.len(), Some(7)),
            market: MarketDataService::new(market.clone(), fetcher("market", &cache, &clock), 300),
            filings: FilingsService::new(
                filings.clone(),
                fetcher("filings", &cache, &clock),
                3600,
                5,
                "https://www.sec.gov/Archives/edgar/data",
            ),
            cache,
            roster,
            history: history.clone(),
            narrator,
            sink: Arc::new(sink),
            clock: clock.clone(),
            interval,
        });

        Harness {
            orchestrator,
            events,
            history,
            clock,
            market,
            filings,
        }
    }

    fn narrator(result: std::result::Result<&str, &str>) -> Option<Arc<dyn NarrativeGenerator>> {
        Some(Arc::new(FixedNarrator(
            result.map(str::to_string).map_err(str::to_string),
        )))
    }

    fn expect_bundle(event: ReportEvent) -> ReportBundle {
        match event {
            ReportEvent::Bundle(bundle) => *bundle,
            other => panic!("expected bundle, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cycle_delivers_full_bundle() {
        let mut h = harness(
            vec![nvda()],
            StubMarket::with_prices(&[("NVDA", 880.0)]),
            StubFilings::ok(),
            narrator(Ok("Strong year.")),
        );

        let outcome = h.orchestrator.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Reported {
                ticker: "NVDA".into(),
                financials: true,
                narrative: true,
            }
        );

        let bundle = expect_bundle(h.events.recv().await.unwrap());
        assert_eq!(bundle.facts.market.price, Some(880.0));
        assert_eq!(bundle.facts.filings_status, FilingsStatus::Resolved);
        let financials = bundle.facts.financials.unwrap();
        assert_eq!(financials.value(CanonicalMetric::Revenue), Some(60922000000.0));
        assert_eq!(bundle.facts.recent_filings.len(), 1);
        assert_eq!(bundle.facts.recent_filings[0].form, "10-K");
        assert_eq!(bundle.narrative.text(), Some("Strong year."));

        let history = h.history.load().unwrap();
        assert_eq!(history.last_sent("NVDA"), Some(t0()));
    }

    #[tokio::test]
    async fn test_missing_quote_emits_notice_and_records_history() {
        let mut h = harness(
            vec![nvda()],
            StubMarket::with_prices(&[]),
            StubFilings::ok(),
            None,
        );

        let outcome = h.orchestrator.run_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Unavailable { ref ticker, .. } if ticker == "NVDA"));

        match h.events.recv().await.unwrap() {
            ReportEvent::Unavailable(notice) => {
                assert_eq!(notice.entity.ticker, "NVDA");
                assert!(notice.reason.contains("no quote"));
            }
            other => panic!("expected notice, got {:?}", other),
        }

        // quote only, nothing else fetched
        assert_eq!(h.market.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.filings.calls.load(Ordering::SeqCst), 0);
        assert!(h.history.load().unwrap().last_sent("NVDA").is_some());
    }

    #[tokio::test]
    async fn test_entity_without_filer_id_skips_filings() {
        let mut h = harness(
            vec![TrackedEntity::new("CD Projekt", "CDR.WA", "PLN").with_venue("WSE")],
            StubMarket::with_prices(&[("CDR.WA", 120.0)]),
            StubFilings::ok(),
            None,
        );

        let outcome = h.orchestrator.run_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Reported { financials: false, narrative: false, .. }));

        let bundle = expect_bundle(h.events.recv().await.unwrap());
        assert_eq!(bundle.facts.filings_status, FilingsStatus::Skipped);
        assert_eq!(bundle.facts.market.currency, "PLN");
        assert_eq!(bundle.narrative, NarrativeStatus::Disabled);
        assert_eq!(h.filings.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_filings_failure_degrades_bundle() {
        let mut h = harness(
            vec![nvda()],
            StubMarket::with_prices(&[("NVDA", 880.0)]),
            StubFilings::failing(SourceError::Unavailable { status: 503 }),
            None,
        );

        let outcome = h.orchestrator.run_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Reported { financials: false, .. }));

        let bundle = expect_bundle(h.events.recv().await.unwrap());
        assert!(bundle.facts.financials.is_none());
        assert!(matches!(bundle.facts.filings_status, FilingsStatus::Unavailable { .. }));
        // recent filings come from a separate document and still succeed
        assert_eq!(bundle.facts.recent_filings.len(), 1);
    }

    #[tokio::test]
    async fn test_narrative_failure_degrades_bundle() {
        let mut h = harness(
            vec![nvda()],
            StubMarket::with_prices(&[("NVDA", 880.0)]),
            StubFilings::ok(),
            narrator(Err("upstream overloaded")),
        );

        let outcome = h.orchestrator.run_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Reported { financials: true, narrative: false, .. }));

        let bundle = expect_bundle(h.events.recv().await.unwrap());
        match bundle.narrative {
            NarrativeStatus::Degraded { reason } => assert!(reason.contains("upstream overloaded")),
            other => panic!("expected degraded narrative, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sink_failure_still_records_history() {
        let h = harness(
            vec![nvda()],
            StubMarket::with_prices(&[("NVDA", 880.0)]),
            StubFilings::ok(),
            None,
        );
        drop(h.events);

        h.orchestrator.run_cycle().await.unwrap();
        assert!(h.history.load().unwrap().last_sent("NVDA").is_some());
    }

    #[tokio::test]
    async fn test_consecutive_cycles_rotate_roster() {
        let mut h = harness(
            vec![nvda(), TrackedEntity::new("Uber", "UBER", "USD")],
            StubMarket::with_prices(&[("NVDA", 880.0), ("UBER", 70.0)]),
            StubFilings::ok(),
            None,
        );

        let mut seen = Vec::new();
        for _ in 0..2 {
            h.orchestrator.run_cycle().await.unwrap();
            seen.push(h.events.recv().await.unwrap().ticker().to_string());
            h.clock.advance(chrono::Duration::minutes(15));
        }
        seen.sort();
        assert_eq!(seen, vec!["NVDA", "UBER"]);
    }

    #[tokio::test]
    async fn test_cached_payloads_reused_within_ttl() {
        let h = harness(
            vec![nvda()],
            StubMarket::with_prices(&[("NVDA", 880.0)]),
            StubFilings::ok(),
            None,
        );

        h.orchestrator.full_report("NVDA").await.unwrap();
        let market_calls = h.market.calls.load(Ordering::SeqCst);
        let filings_calls = h.filings.calls.load(Ordering::SeqCst);

        h.clock.advance(chrono::Duration::seconds(60));
        h.orchestrator.full_report("NVDA").await.unwrap();
        assert_eq!(h.market.calls.load(Ordering::SeqCst), market_calls);
        assert_eq!(h.filings.calls.load(Ordering::SeqCst), filings_calls);
    }

    #[tokio::test]
    async fn test_empty_roster_is_idle() {
        let h = harness(Vec::new(), StubMarket::with_prices(&[]), StubFilings::ok(), None);
        assert_eq!(h.orchestrator.run_cycle().await.unwrap(), CycleOutcome::Idle);
        assert_eq!(h.market.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_full_report_leaves_history_untouched() {
        let h = harness(
            vec![nvda()],
            StubMarket::with_prices(&[("NVDA", 880.0), ("AAPL", 190.0)]),
            StubFilings::ok(),
            narrator(Ok("ok")),
        );

        let roster_report = h.orchestrator.full_report("nvda").await.unwrap();
        assert_eq!(roster_report.facts.filings_status, FilingsStatus::Resolved);

        // not on the roster: ad-hoc entity, no filer id
        let ad_hoc = h.orchestrator.full_report("aapl").await.unwrap();
        assert_eq!(ad_hoc.facts.entity.ticker, "AAPL");
        assert_eq!(ad_hoc.facts.filings_status, FilingsStatus::Skipped);

        assert!(h.history.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_market_propagates_unavailable() {
        let h = harness(vec![nvda()], StubMarket::with_prices(&[]), StubFilings::ok(), None);
        let err = h.orchestrator.lookup_market("NVDA").await.unwrap_err();
        assert!(matches!(err, SourceError::DataNotAvailable(_)));
    }

    #[tokio::test]
    async fn test_lookup_filings_rejects_malformed_id() {
        let h = harness(vec![nvda()], StubMarket::with_prices(&[]), StubFilings::ok(), None);

        let err = h.orchestrator.lookup_filings("1045810").await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidRequest(_)));
        assert_eq!(h.filings.calls.load(Ordering::SeqCst), 0);

        let report = h.orchestrator.lookup_filings(NVDA_CIK).await.unwrap();
        assert_eq!(report.financials.value(CanonicalMetric::NetIncome), Some(29760000000.0));
        assert_eq!(report.recent_filings.len(), 1);
    }

    #[tokio::test]
    async fn test_history_overview_reports_cooldown() {
        let h = harness(
            vec![nvda(), TrackedEntity::new("Uber", "UBER", "USD")],
            StubMarket::with_prices(&[("NVDA", 880.0), ("UBER", 70.0)]),
            StubFilings::ok(),
            None,
        );

        let outcome = h.orchestrator.run_cycle().await.unwrap();
        let CycleOutcome::Reported { ticker: sent, .. } = outcome else {
            panic!("expected a report");
        };
        h.clock.advance(chrono::Duration::minutes(10));

        let overview = h.orchestrator.history_overview().unwrap();
        assert_eq!(overview.len(), 2);
        for entry in overview {
            if entry.ticker == sent {
                assert_eq!(entry.minutes_since, Some(10));
                assert!(!entry.eligible);
            } else {
                assert!(entry.last_sent.is_none());
                assert!(entry.eligible);
            }
        }
    }

    #[test]
    fn test_refresh_interval_is_clamped() {
        assert_eq!(refresh_interval(0), Duration::from_secs(60));
        assert_eq!(refresh_interval(15), Duration::from_secs(15 * 60));
        assert_eq!(
            refresh_interval(u64::MAX),
            Duration::from_secs(MAX_INTERVAL_MINUTES * 60)
        );
    }

    #[tokio::test]
    async fn test_with_deadline_maps_timeout_to_network_error() {
        let result = Orchestrator::with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, SourceError>(())
        })
        .await;
        assert!(matches!(result, Err(SourceError::Network(_))));

        let result = Orchestrator::with_deadline(Duration::from_secs(1), async { Ok::<_, SourceError>(7) }).await;
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn test_run_returns_on_shutdown() {
        let h = harness(
            vec![nvda()],
            StubMarket::with_prices(&[("NVDA", 880.0)]),
            StubFilings::ok(),
            None,
        );
        h.orchestrator.run(async {}).await;
    }
}
