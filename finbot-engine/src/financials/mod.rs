//! Canonical financial records.
//!
//! Two pure transformations live here:
//! - [`ConceptResolver`]: raw XBRL facts → one [`ResolvedFact`] per
//!   [`CanonicalMetric`], plus [`DerivedRatios`]
//! - [`MetricNormalizer`]: provider market payloads → [`MarketSnapshot`]
//!
//! Every metric is optional. Absence is never replaced by zero.

mod facts;
mod normalizer;
mod resolver;

pub use facts::{parse_recent_filings, CompanyFacts, FormTier, RawConceptFact, RecentFiling};
pub use normalizer::{
    AnalystRating, CompanyProfile, MarketSnapshot, MetricNormalizer, PriceTarget,
    ProviderPayload, Recommendations, Valuation,
};
pub use resolver::{derive_ratios, ConceptResolver};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Canonical Metrics
// ============================================================================

/// The fixed set of metrics resolved from filings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalMetric {
    Revenue,
    GrossProfit,
    OperatingIncome,
    NetIncome,
    EpsDiluted,
    EpsBasic,
    SharesOutstanding,
    TotalAssets,
    TotalLiabilities,
    Equity,
    Cash,
    LongTermDebt,
    CurrentAssets,
    CurrentLiabilities,
    OperatingCashFlow,
    CapitalExpenditure,
    DividendsPaid,
}

impl CanonicalMetric {
    pub const ALL: [CanonicalMetric; 17] = [
        Self::Revenue,
        Self::GrossProfit,
        Self::OperatingIncome,
        Self::NetIncome,
        Self::EpsDiluted,
        Self::EpsBasic,
        Self::SharesOutstanding,
        Self::TotalAssets,
        Self::TotalLiabilities,
        Self::Equity,
        Self::Cash,
        Self::LongTermDebt,
        Self::CurrentAssets,
        Self::CurrentLiabilities,
        Self::OperatingCashFlow,
        Self::CapitalExpenditure,
        Self::DividendsPaid,
    ];

    /// us-gaap concepts reporting this metric, highest priority first.
    pub fn synonyms(&self) -> &'static [&'static str] {
        match self {
            Self::Revenue => &[
                "Revenues",
                "RevenueFromContractWithCustomerExcludingAssessedTax",
                "SalesRevenueNet",
            ],
            Self::GrossProfit => &["GrossProfit"],
            Self::OperatingIncome => &["OperatingIncomeLoss"],
            Self::NetIncome => &["NetIncomeLoss"],
            Self::EpsDiluted => &["EarningsPerShareDiluted"],
            Self::EpsBasic => &["EarningsPerShareBasic"],
            Self::SharesOutstanding => &["CommonStockSharesOutstanding"],
            Self::TotalAssets => &["Assets"],
            Self::TotalLiabilities => &["Liabilities"],
            Self::Equity => &["StockholdersEquity"],
            Self::Cash => &[
                "CashAndCashEquivalentsAtCarryingValue",
                "CashCashEquivalentsAndShortTermInvestments",
            ],
            Self::LongTermDebt => &["LongTermDebt", "LongTermDebtNoncurrent"],
            Self::CurrentAssets => &["AssetsCurrent"],
            Self::CurrentLiabilities => &["LiabilitiesCurrent"],
            Self::OperatingCashFlow => &["NetCashProvidedByUsedInOperatingActivities"],
            Self::CapitalExpenditure => &["PaymentsToAcquirePropertyPlantAndEquipment"],
            Self::DividendsPaid => &["PaymentsOfDividends"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Revenue => "revenue",
            Self::GrossProfit => "gross_profit",
            Self::OperatingIncome => "operating_income",
            Self::NetIncome => "net_income",
            Self::EpsDiluted => "eps_diluted",
            Self::EpsBasic => "eps_basic",
            Self::SharesOutstanding => "shares_outstanding",
            Self::TotalAssets => "total_assets",
            Self::TotalLiabilities => "total_liabilities",
            Self::Equity => "equity",
            Self::Cash => "cash",
            Self::LongTermDebt => "long_term_debt",
            Self::CurrentAssets => "current_assets",
            Self::CurrentLiabilities => "current_liabilities",
            Self::OperatingCashFlow => "operating_cash_flow",
            Self::CapitalExpenditure => "capital_expenditure",
            Self::DividendsPaid => "dividends_paid",
        }
    }
}

impl std::fmt::Display for CanonicalMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Resolved Records
// ============================================================================

/// The single fact chosen for a metric, with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedFact {
    pub value: f64,
    pub period_end: NaiveDate,
    pub unit: String,
    pub form: String,
    pub accession: String,
    /// Concept the value was reported under
    pub concept: String,
}

/// Ratios computed from resolved facts. Each needs all of its inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedRatios {
    pub net_margin: Option<f64>,
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub free_cash_flow: Option<f64>,
    pub debt_ratio: Option<f64>,
    pub current_ratio: Option<f64>,
}

/// Filings-derived record for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalFinancials {
    pub entity_name: String,
    pub filer_id: String,
    pub metrics: BTreeMap<CanonicalMetric, ResolvedFact>,
    pub derived: DerivedRatios,
}

impl CanonicalFinancials {
    pub fn get(&self, metric: CanonicalMetric) -> Option<&ResolvedFact> {
        self.metrics.get(&metric)
    }

    pub fn value(&self, metric: CanonicalMetric) -> Option<f64> {
        self.get(metric).map(|f| f.value)
    }

    /// Metrics with no usable fact.
    pub fn missing(&self) -> Vec<CanonicalMetric> {
        CanonicalMetric::ALL
            .iter()
            .copied()
            .filter(|m| !self.metrics.contains_key(m))
            .collect()
    }
}
