//! # semlink common library
//!
//! Shared code for the semlink enrichment services:
//! - Error type and result alias
//! - TOML configuration loading and resolution
//! - Logging bootstrap

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
