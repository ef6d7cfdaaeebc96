//! # FitScan Common Library
//!
//! Shared code for FitScan services including:
//! - Common error type
//! - Bootstrap configuration loading (TOML) and root folder resolution
//! - Client scan identifier helpers

pub mod config;
pub mod error;
pub mod scan_id;

pub use error::{Error, Result};
pub use scan_id::ClientScanId;
