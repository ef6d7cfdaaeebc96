//! Client scan identifiers
//!
//! A `ClientScanId` is generated once per scan attempt by the caller and then
//! threaded unchanged through every stage call and every commit retry. It is
//! the idempotency key for the final write.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Error, Result};

/// Opaque, caller-owned scan correlation key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientScanId(String);

impl ClientScanId {
    /// Generate a fresh identifier (UUIDv4, hyphenated)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap a caller-provided identifier
    ///
    /// The value is opaque and kept byte for byte; only blank strings are
    /// rejected.
    pub fn parse(s: &str) -> Result<Self> {
        let id = Self(s.to_string());
        if id.is_blank() {
            return Err(Error::InvalidInput(
                "client scan id must not be empty".to_string(),
            ));
        }
        Ok(id)
    }

    /// True for an empty or whitespace-only id (possible via deserialization)
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
