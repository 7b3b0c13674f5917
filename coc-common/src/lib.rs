//! COC Common - Shared configuration, error and logging types for the COC alert relay.
//!
//! This crate provides:
//! - Configuration types, loading and validation
//! - Error types and handling utilities
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{AlertsConfig, Config, MetricsConfig, ObservabilityConfig, TelegramConfig};
pub use config::{ValidationError, ValidationResult};
pub use error::{Error, Result};
