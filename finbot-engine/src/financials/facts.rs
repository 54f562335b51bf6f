//! Parsing of EDGAR company-facts and submissions payloads.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::data::{FilerId, SourceError};

/// Only this taxonomy is consulted.
const TAXONOMY: &str = "us-gaap";

/// Forms listed in the recent filings index.
const INDEXED_FORMS: &[&str] = &["10-K", "10-Q", "8-K"];

/// Preference tier of a filing form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FormTier {
    /// 10-K, 20-F
    Annual,
    /// 10-Q
    Quarterly,
}

impl FormTier {
    /// Tier for a form type. Other forms (8-K, S-1, ...) are never candidates.
    pub fn classify(form: &str) -> Option<Self> {
        match form {
            "10-K" | "20-F" => Some(Self::Annual),
            "10-Q" => Some(Self::Quarterly),
            _ => None,
        }
    }
}

/// One reported value for one concept.
#[derive(Debug, Clone, PartialEq)]
pub struct RawConceptFact {
    pub concept: String,
    pub value: f64,
    pub unit: String,
    pub period_end: NaiveDate,
    pub form: String,
    pub accession: String,
}

impl RawConceptFact {
    pub fn tier(&self) -> Option<FormTier> {
        FormTier::classify(&self.form)
    }
}

/// Facts for one filer, in payload order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompanyFacts {
    pub entity_name: String,
    pub facts: Vec<RawConceptFact>,
}

#[derive(Deserialize)]
struct CompanyFactsDoc {
    #[serde(rename = "entityName", default)]
    entity_name: Option<String>,
    #[serde(default)]
    facts: HashMap<String, HashMap<String, ConceptDoc>>,
}

#[derive(Deserialize)]
struct ConceptDoc {
    // BTreeMap keeps unit iteration stable across runs
    #[serde(default)]
    units: BTreeMap<String, Vec<FactDoc>>,
}

#[derive(Deserialize)]
struct FactDoc {
    #[serde(default)]
    val: Option<f64>,
    #[serde(default)]
    end: Option<String>,
    #[serde(default)]
    form: Option<String>,
    #[serde(default)]
    accn: Option<String>,
}

impl CompanyFacts {
    /// Parse a company-facts document.
    ///
    /// Facts with a null value or an unreadable period end are dropped.
    pub fn from_json(value: &Value) -> Result<Self, SourceError> {
        let doc = CompanyFactsDoc::deserialize(value)
            .map_err(|e| SourceError::Decode(format!("company facts: {}", e)))?;

        let mut facts = Vec::new();
        if let Some(concepts) = doc.facts.get(TAXONOMY) {
            for (concept, concept_doc) in concepts {
                for (unit, entries) in &concept_doc.units {
                    for entry in entries {
                        let Some(value) = entry.val.filter(|v| v.is_finite()) else {
                            continue;
                        };
                        let Some(period_end) = entry
                            .end
                            .as_deref()
                            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                        else {
                            continue;
                        };
                        facts.push(RawConceptFact {
                            concept: concept.clone(),
                            value,
                            unit: unit.clone(),
                            period_end,
                            form: entry.form.clone().unwrap_or_default(),
                            accession: entry.accn.clone().unwrap_or_default(),
                        });
                    }
                }
            }
        }

        Ok(Self {
            entity_name: doc.entity_name.unwrap_or_default(),
            facts,
        })
    }

    /// Facts reported under `concept`, in payload order.
    pub fn for_concept<'a>(&'a self, concept: &'a str) -> impl Iterator<Item = &'a RawConceptFact> + 'a {
        self.facts.iter().filter(move |f| f.concept == concept)
    }
}

// ============================================================================
// Recent Filings
// ============================================================================

/// Entry of the recent filings index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentFiling {
    pub form: String,
    pub filing_date: String,
    pub accession: String,
    pub url: String,
}

#[derive(Deserialize, Default)]
struct RecentColumns {
    #[serde(default)]
    form: Vec<String>,
    #[serde(rename = "filingDate", default)]
    filing_date: Vec<String>,
    #[serde(rename = "accessionNumber", default)]
    accession_number: Vec<String>,
}

/// Most recent 10-K/10-Q/8-K filings from a submissions document.
///
/// The index is column-oriented (`filings.recent.form[]`, `filingDate[]`,
/// `accessionNumber[]`), newest first.
pub fn parse_recent_filings(
    value: &Value,
    filer: &FilerId,
    archive_base_url: &str,
    count: usize,
) -> Result<Vec<RecentFiling>, SourceError> {
    let filings = value.get("filings");
    let columns = match filings.and_then(|f| f.get("recent")).or(filings) {
        Some(v) if !v.is_null() => RecentColumns::deserialize(v)
            .map_err(|e| SourceError::Decode(format!("submissions: {}", e)))?,
        _ => RecentColumns::default(),
    };

    let base = archive_base_url.trim_end_matches('/');
    let recent = columns
        .form
        .iter()
        .zip(&columns.filing_date)
        .zip(&columns.accession_number)
        .filter(|((form, _), _)| INDEXED_FORMS.contains(&form.as_str()))
        .take(count)
        .map(|((form, date), accession)| RecentFiling {
            form: form.clone(),
            filing_date: date.clone(),
            accession: accession.clone(),
            url: format!(
                "{}/{}/{}/",
                base,
                filer.unpadded(),
                accession.replace('-', "")
            ),
        })
        .collect();

    Ok(recent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn facts_doc() -> Value {
        json!({
            "cik": 1045810,
            "entityName": "NVIDIA CORP",
            "facts": {
                "dei": {
                    "EntityCommonStockSharesOutstanding": {
                        "units": { "shares": [ { "val": 1, "end": "2024-01-01", "form": "10-K" } ] }
                    }
                },
                "us-gaap": {
                    "NetIncomeLoss": {
                        "label": "Net Income (Loss)",
                        "units": {
                            "USD": [
                                { "val": 29760000000i64, "end": "2024-01-28", "form": "10-K", "accn": "0001045810-24-000029", "fy": 2024 },
                                { "val": null, "end": "2023-10-29", "form": "10-Q", "accn": "x" },
                                { "val": 0, "end": "2023-07-30", "form": "10-Q", "accn": "y" },
                                { "val": 5, "end": "not-a-date", "form": "10-Q" }
                            ]
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn test_parse_only_us_gaap() {
        let facts = CompanyFacts::from_json(&facts_doc()).unwrap();
        assert_eq!(facts.entity_name, "NVIDIA CORP");
        assert!(facts.facts.iter().all(|f| f.concept == "NetIncomeLoss"));
    }

    #[test]
    fn test_null_dropped_zero_kept() {
        let facts = CompanyFacts::from_json(&facts_doc()).unwrap();
        let values: Vec<f64> = facts.for_concept("NetIncomeLoss").map(|f| f.value).collect();
        assert_eq!(values, vec![29_760_000_000.0, 0.0]);
    }

    #[test]
    fn test_missing_facts_object_is_empty() {
        let facts = CompanyFacts::from_json(&json!({ "entityName": "Shell Co" })).unwrap();
        assert!(facts.facts.is_empty());
    }

    #[test]
    fn test_non_object_is_decode_error() {
        let err = CompanyFacts::from_json(&json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)));
    }

    #[test]
    fn test_form_tiers() {
        assert_eq!(FormTier::classify("10-K"), Some(FormTier::Annual));
        assert_eq!(FormTier::classify("20-F"), Some(FormTier::Annual));
        assert_eq!(FormTier::classify("10-Q"), Some(FormTier::Quarterly));
        assert_eq!(FormTier::classify("8-K"), None);
        assert_eq!(FormTier::classify("10-K/A"), None);
    }

    #[test]
    fn test_recent_filings_filtered_and_linked() {
        let doc = json!({
            "filings": {
                "recent": {
                    "form": ["4", "8-K", "10-Q", "S-8", "10-K", "10-Q"],
                    "filingDate": ["2024-06-01", "2024-05-22", "2024-05-29", "2024-05-01", "2024-02-21", "2023-11-21"],
                    "accessionNumber": [
                        "0001-24-000001", "0001045810-24-000113", "0001045810-24-000124",
                        "0001-24-000002", "0001045810-24-000029", "0001045810-23-000227"
                    ]
                }
            }
        });
        let filer = FilerId::parse("0001045810").unwrap();

        let recent = parse_recent_filings(&doc, &filer, "https://www.sec.gov/Archives/edgar/data/", 3).unwrap();

        let forms: Vec<&str> = recent.iter().map(|f| f.form.as_str()).collect();
        assert_eq!(forms, vec!["8-K", "10-Q", "10-K"]);
        assert_eq!(
            recent[0].url,
            "https://www.sec.gov/Archives/edgar/data/1045810/000104581024000113/"
        );
        assert_eq!(recent[2].filing_date, "2024-02-21");
    }

    #[test]
    fn test_recent_filings_missing_index_is_empty() {
        let filer = FilerId::parse("0001045810").unwrap();
        let recent = parse_recent_filings(&json!({}), &filer, "https://x", 3).unwrap();
        assert!(recent.is_empty());
    }
}
