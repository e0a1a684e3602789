//! Pipeline Configuration Module
//!
//! All attribution tunables loaded from TOML, validated once at startup and
//! then handed to the pipeline by value.
//!
//! ## Loading Order
//!
//! 1. `PERFSHIFT_CONFIG` environment variable (path to TOML file)
//! 2. `perfshift.toml` in the current working directory
//! 3. Built-in defaults (see `defaults.rs`)
//!
//! ## Usage
//!
//! ```ignore
//! let config = PipelineConfig::load();
//! config.validate()?;
//! let pipeline = Pipeline::new(config, libraries)?;
//! ```

mod pipeline_config;
pub mod defaults;
pub mod validation;

pub use pipeline_config::*;
