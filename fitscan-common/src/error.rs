//! Shared error type for the fitscan crates
//!
//! Used by bootstrap configuration, scan id parsing and the SQLite layer.
//! Stage and HTTP errors live in `fitscan-bodyscan`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// SQLite query or connection failure
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Root folder creation or file access failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bootstrap TOML, stored setting or missing credential
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller-supplied value rejected (blank scan id, inverted bounds)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored data that no longer decodes, or retries gave up
    #[error("Internal error: {0}")]
    Internal(String),
}
