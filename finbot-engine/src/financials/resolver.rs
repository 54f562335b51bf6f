//! Concept resolution: many raw facts in, one value per metric out.
//!
//! Selection order for a metric:
//! 1. Annual forms (10-K, 20-F) across all synonyms; quarterly (10-Q) only
//!    when no annual fact exists for any synonym.
//! 2. Latest period end within the chosen tier.
//! 3. On equal period ends, the earlier synonym, then payload order.

use std::collections::BTreeMap;
use tracing::debug;

use super::facts::{CompanyFacts, FormTier, RawConceptFact};
use super::{CanonicalFinancials, CanonicalMetric, DerivedRatios, ResolvedFact};

#[derive(Debug, Clone, Copy, Default)]
pub struct ConceptResolver;

impl ConceptResolver {
    pub fn new() -> Self {
        Self
    }

    /// Best fact for `metric`, or `None` when no candidate exists in any tier.
    pub fn resolve(&self, facts: &[RawConceptFact], metric: CanonicalMetric) -> Option<ResolvedFact> {
        [FormTier::Annual, FormTier::Quarterly]
            .into_iter()
            .find_map(|tier| Self::best_in_tier(facts, metric, tier))
            .map(|fact| ResolvedFact {
                value: fact.value,
                period_end: fact.period_end,
                unit: fact.unit.clone(),
                form: fact.form.clone(),
                accession: fact.accession.clone(),
                concept: fact.concept.clone(),
            })
    }

    fn best_in_tier<'a>(
        facts: &'a [RawConceptFact],
        metric: CanonicalMetric,
        tier: FormTier,
    ) -> Option<&'a RawConceptFact> {
        let mut best: Option<&RawConceptFact> = None;
        for concept in metric.synonyms() {
            let candidates = facts
                .iter()
                .filter(|f| f.concept == *concept && f.tier() == Some(tier));
            for fact in candidates {
                // Strictly later only: ties stay with the earlier synonym / position
                if best.map_or(true, |b| fact.period_end > b.period_end) {
                    best = Some(fact);
                }
            }
        }
        best
    }

    /// Resolve every canonical metric and derive ratios.
    pub fn resolve_all(&self, facts: &CompanyFacts, filer_id: &str) -> CanonicalFinancials {
        let metrics: BTreeMap<CanonicalMetric, ResolvedFact> = CanonicalMetric::ALL
            .iter()
            .filter_map(|&m| self.resolve(&facts.facts, m).map(|fact| (m, fact)))
            .collect();

        debug!(
            filer = filer_id,
            resolved = metrics.len(),
            total = CanonicalMetric::ALL.len(),
            "Resolved filing concepts"
        );

        let derived = derive_ratios(&metrics);
        CanonicalFinancials {
            entity_name: facts.entity_name.clone(),
            filer_id: filer_id.to_string(),
            metrics,
            derived,
        }
    }
}

/// Secondary ratios. Each is absent unless all of its inputs are present.
pub fn derive_ratios(metrics: &BTreeMap<CanonicalMetric, ResolvedFact>) -> DerivedRatios {
    let v = |m: CanonicalMetric| metrics.get(&m).map(|f| f.value);
    use CanonicalMetric::*;

    DerivedRatios {
        net_margin: ratio(v(NetIncome), v(Revenue)),
        gross_margin: ratio(v(GrossProfit), v(Revenue)),
        operating_margin: ratio(v(OperatingIncome), v(Revenue)),
        free_cash_flow: match (v(OperatingCashFlow), v(CapitalExpenditure)) {
            (Some(cfo), Some(capex)) => finite(cfo - capex.abs()),
            _ => None,
        },
        debt_ratio: ratio(v(TotalLiabilities), v(TotalAssets)),
        current_ratio: ratio(v(CurrentAssets), v(CurrentLiabilities)),
    }
}

fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d != 0.0 => finite(n / d),
        _ => None,
    }
}

fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}

// ============================================================================
// Tests
// ============================================================================
