//! Utility modules for mek-enrich

pub mod db_retry;

pub use db_retry::retry_on_lock;
