//! FinBot Common - Shared configuration, errors and logging for FinBot services.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Error types
//! - Logging setup
//! - Small string utilities (truncation, log redaction)

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    Config, FilingsSourceConfig, MarketSourceConfig, NarrativeConfig, ObservabilityConfig,
    ScheduleConfig, TrackedEntityConfig,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};

