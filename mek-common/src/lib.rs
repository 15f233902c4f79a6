//! # MEK Common Library
//!
//! Shared code for the metabolite enrichment kit crates:
//! - Common error and result types
//! - Configuration file and root folder resolution
//! - Atomic file writes for persisted JSON/TOML documents
//! - SQLite pool initialisation
//! - Tracing subscriber setup

pub mod config;
pub mod db;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
