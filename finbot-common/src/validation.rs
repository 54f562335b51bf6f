//! Configuration validation for FinBot services.
//!
//! Catches misconfiguration at startup: malformed filer IDs, empty rosters,
//! zero intervals and the like.

use std::collections::HashSet;
use thiserror::Error;

use crate::config::{
    Config, FilingsSourceConfig, MarketSourceConfig, ObservabilityConfig, ScheduleConfig,
    TrackedEntityConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

/// Check that a CIK is exactly ten ASCII digits.
pub fn is_valid_cik(cik: &str) -> bool {
    cik.len() == 10 && cik.bytes().all(|b| b.is_ascii_digit())
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        let sections: [&dyn Validate; 4] = [
            &self.observability,
            &self.market,
            &self.filings,
            &self.schedule,
        ];
        for section in sections {
            if let Err(e) = section.validate() {
                errors.push(e);
            }
        }

        if let Err(e) = validate_roster(&self.entities) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

fn validate_roster(entities: &[TrackedEntityConfig]) -> ValidationResult<()> {
    if entities.is_empty() {
        return Err(ValidationError::MissingField {
            field: "entities (at least one tracked entity)".into(),
        });
    }

    let mut seen = HashSet::new();
    for (i, entity) in entities.iter().enumerate() {
        if entity.ticker.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: format!("entities[{}].ticker", i),
            });
        }
        if !seen.insert(entity.ticker.to_uppercase()) {
            return Err(ValidationError::Conflict {
                reason: format!("Ticker {} is tracked twice", entity.ticker),
            });
        }
        if let Some(cik) = &entity.cik {
            if !is_valid_cik(cik) {
                return Err(ValidationError::InvalidValue {
                    field: format!("entities[{}].cik", i),
                    reason: format!("'{}' must be ten digits, zero-padded", cik),
                });
            }
        }
    }

    Ok(())
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

impl Validate for MarketSourceConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.base_url.is_empty() {
            return Err(ValidationError::MissingField {
                field: "market.base_url".into(),
            });
        }
        if self.cache_ttl_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "market.cache_ttl_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for FilingsSourceConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.user_agent.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "filings.user_agent (SEC requires client identification)".into(),
            });
        }
        if self.cache_ttl_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "filings.cache_ttl_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

/// One week.
pub const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

impl Validate for ScheduleConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.interval_minutes == 0 {
            return Err(ValidationError::InvalidValue {
                field: "schedule.interval_minutes".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(ValidationError::InvalidValue {
                field: "schedule.interval_minutes".into(),
                reason: format!("must be at most {} (one week)", MAX_INTERVAL_MINUTES),
            });
        }
        Ok(())
    }
}
