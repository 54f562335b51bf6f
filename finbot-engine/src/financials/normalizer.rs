//! Finnhub payloads → canonical market snapshot.
//!
//! Scale conventions handled here:
//! - percentages arrive as whole numbers (64.2) and leave as fractions (0.642)
//! - market capitalization and share counts arrive in millions
//! - `dp` on the quote is a percentage, `d` is absolute

use serde::{Deserialize, Serialize};
use serde_json::Value;

use finbot_common::util::truncate_with_ellipsis;

/// Longest profile description kept.
const DESCRIPTION_MAX_CHARS: usize = 450;

/// Raw responses for one symbol. `Value::Null` stands for a missing response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderPayload {
    pub symbol: String,
    pub currency: String,
    pub quote: Value,
    pub profile: Value,
    pub metrics: Value,
    pub recommendations: Value,
    pub price_target: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    /// Company name, or the ticker when the provider has none
    pub name: String,
    pub sector: Option<String>,
    pub country: Option<String>,
    pub exchange: Option<String>,
    pub ipo: Option<String>,
    pub employees: Option<u64>,
    pub website: Option<String>,
    pub description: Option<String>,
}

/// Valuation, profitability, leverage and growth metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub market_cap: Option<f64>,
    pub pe: Option<f64>,
    pub forward_pe: Option<f64>,
    pub eps: Option<f64>,
    pub price_to_book: Option<f64>,
    pub price_to_sales: Option<f64>,
    pub ev_to_ebitda: Option<f64>,
    pub revenue: Option<f64>,
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub net_margin: Option<f64>,
    pub roe: Option<f64>,
    pub roa: Option<f64>,
    pub roic: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub current_ratio: Option<f64>,
    pub quick_ratio: Option<f64>,
    pub fcf_yield: Option<f64>,
    pub revenue_growth_5y: Option<f64>,
    pub eps_growth_5y: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub beta: Option<f64>,
    pub week52_high: Option<f64>,
    pub week52_low: Option<f64>,
    pub week52_return: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalystRating {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl AnalystRating {
    pub fn label(&self) -> &'static str {
        match self {
            Self::StrongBuy => "STRONG BUY",
            Self::Buy => "BUY",
            Self::Hold => "HOLD",
            Self::Sell => "SELL",
            Self::StrongSell => "STRONG SELL",
        }
    }
}

/// Latest analyst recommendation period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendations {
    pub period: Option<String>,
    pub strong_buy: u64,
    pub buy: u64,
    pub hold: u64,
    pub sell: u64,
    pub strong_sell: u64,
    pub total: u64,
    /// Most common rating; absent when there are no ratings
    pub consensus: Option<AnalystRating>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceTarget {
    pub mean: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
}

/// Canonical market view of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub currency: String,
    pub price: Option<f64>,
    pub prev_close: Option<f64>,
    pub change: Option<f64>,
    /// Daily change as a fraction (0.0123 = +1.23%)
    pub change_fraction: Option<f64>,
    pub day_high: Option<f64>,
    pub day_low: Option<f64>,
    pub open: Option<f64>,
    pub profile: CompanyProfile,
    pub valuation: Valuation,
    pub recommendations: Option<Recommendations>,
    pub price_target: Option<PriceTarget>,
}

impl MarketSnapshot {
    /// A quote without a non-zero price means the symbol is unknown upstream.
    pub fn has_price(&self) -> bool {
        self.price.is_some_and(|p| p != 0.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricNormalizer;

impl MetricNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, payload: &ProviderPayload) -> MarketSnapshot {
        let quote = &payload.quote;
        let price = num(quote, "c");
        let prev_close = num(quote, "pc");

        let change_fraction = pct(quote, "dp").or_else(|| match (price, prev_close) {
            (Some(c), Some(pc)) if pc != 0.0 => finite((c - pc) / pc),
            _ => None,
        });

        MarketSnapshot {
            symbol: payload.symbol.clone(),
            currency: payload.currency.clone(),
            price,
            prev_close,
            change: num(quote, "d"),
            change_fraction,
            day_high: num(quote, "h"),
            day_low: num(quote, "l"),
            open: num(quote, "o"),
            profile: self.profile(&payload.profile, &payload.symbol),
            valuation: self.valuation(payload.metrics.get("metric").unwrap_or(&Value::Null)),
            recommendations: self.recommendations(&payload.recommendations),
            price_target: self.price_target(&payload.price_target),
        }
    }

    fn profile(&self, profile: &Value, symbol: &str) -> CompanyProfile {
        CompanyProfile {
            name: text(profile, "name").unwrap_or_else(|| symbol.to_string()),
            sector: text(profile, "finnhubIndustry"),
            country: text(profile, "country"),
            exchange: text(profile, "exchange"),
            ipo: text(profile, "ipo"),
            employees: num(profile, "employeeTotal")
                .filter(|n| *n >= 0.0)
                .map(|n| n.round() as u64),
            website: text(profile, "weburl"),
            description: text(profile, "description")
                .map(|d| truncate_with_ellipsis(&d, DESCRIPTION_MAX_CHARS)),
        }
    }

    fn valuation(&self, m: &Value) -> Valuation {
        let revenue = match (num(m, "revenuePerShareAnnual"), num(m, "sharesOutstanding")) {
            (Some(per_share), Some(shares_m)) => finite(per_share * shares_m * 1e6),
            _ => None,
        };

        Valuation {
            market_cap: num(m, "marketCapitalization").and_then(|v| finite(v * 1e6)),
            pe: num(m, "peBasicExclExtraTTM").or_else(|| num(m, "peTTM")),
            forward_pe: num(m, "forwardPE"),
            eps: num(m, "epsBasicExclExtraAnnual").or_else(|| num(m, "epsTTM")),
            price_to_book: num(m, "pbAnnual"),
            price_to_sales: num(m, "psTTM"),
            ev_to_ebitda: num(m, "evToEbitda"),
            revenue,
            gross_margin: pct(m, "grossMarginAnnual"),
            operating_margin: pct(m, "operatingMarginAnnual"),
            net_margin: pct(m, "netMarginAnnual"),
            roe: pct(m, "roeAnnual"),
            roa: pct(m, "roaAnnual"),
            roic: pct(m, "roicAnnual"),
            debt_to_equity: num(m, "totalDebt/totalEquityAnnual")
                .or_else(|| num(m, "longTermDebt/equityAnnual")),
            current_ratio: num(m, "currentRatioAnnual"),
            quick_ratio: num(m, "quickRatioAnnual"),
            fcf_yield: pct(m, "fcfYieldTTM"),
            revenue_growth_5y: pct(m, "revenueGrowth5Y"),
            eps_growth_5y: pct(m, "epsGrowth5Y"),
            dividend_yield: pct(m, "dividendYieldIndicatedAnnual"),
            beta: num(m, "beta"),
            week52_high: num(m, "52WeekHigh"),
            week52_low: num(m, "52WeekLow"),
            week52_return: pct(m, "52WeekPriceReturnDaily"),
        }
    }

    /// Newest period is first in the provider's array.
    fn recommendations(&self, value: &Value) -> Option<Recommendations> {
        let latest = value.as_array()?.first()?;
        let count = |field: &str| latest.get(field).and_then(Value::as_u64).unwrap_or(0);

        let strong_buy = count("strongBuy");
        let buy = count("buy");
        let hold = count("hold");
        let sell = count("sell");
        let strong_sell = count("strongSell");
        let total = strong_buy + buy + hold + sell + strong_sell;

        // First maximum wins, so ties lean toward the more bullish rating
        let consensus = if total == 0 {
            None
        } else {
            [
                (AnalystRating::StrongBuy, strong_buy),
                (AnalystRating::Buy, buy),
                (AnalystRating::Hold, hold),
                (AnalystRating::Sell, sell),
                (AnalystRating::StrongSell, strong_sell),
            ]
            .into_iter()
            .fold(None::<(AnalystRating, u64)>, |best, (rating, n)| match best {
                Some((_, top)) if top >= n => best,
                _ => Some((rating, n)),
            })
            .map(|(rating, _)| rating)
        };

        Some(Recommendations {
            period: text(latest, "period"),
            strong_buy,
            buy,
            hold,
            sell,
            strong_sell,
            total,
            consensus,
        })
    }

    fn price_target(&self, value: &Value) -> Option<PriceTarget> {
        let target = PriceTarget {
            mean: num(value, "targetMean"),
            high: num(value, "targetHigh"),
            low: num(value, "targetLow"),
        };
        (target != PriceTarget::default()).then_some(target)
    }
}

fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}

/// Numeric field; null, missing or non-numeric is absent.
fn num(v: &Value, field: &str) -> Option<f64> {
    v.get(field).and_then(Value::as_f64).and_then(finite)
}

/// Whole-number percentage field as a fraction.
fn pct(v: &Value, field: &str) -> Option<f64> {
    num(v, field).map(|p| p / 100.0)
}

/// Non-empty string field.
fn text(v: &Value, field: &str) -> Option<String> {
    v.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Tests
// ============================================================================
