//! Hotlist Common - shared configuration and logging for the hotlist workspace.
//!
//! This crate provides:
//! - Configuration types and loading (file + environment overrides)
//! - Configuration validation
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;
pub mod validation;

pub use config::{
    CalendarConfig, Config, NormalizerConfig, ObservabilityConfig, StoreConfig, TushareConfig,
};
pub use validation::{Validate, ValidationError, ValidationResult};
