//! Stage capabilities
//!
//! The four AI-backed stages and the commit target are external services. Each
//! is a trait so the orchestrator can run against the HTTP client in
//! production and against fixture doubles in tests.
//!
//! | Stage    | Trait                        | Retries |
//! |----------|------------------------------|---------|
//! | Estimate | [`BodyMeasurementEstimator`] | none    |
//! | Semantic | [`SemanticClassifier`]       | none    |
//! | Match    | [`ArchetypeMatcher`]         | none    |
//! | Refine   | [`MorphologicalRefiner`]     | none    |
//! | Commit   | [`CommitBackend`]            | fixed delay, bounded |

pub mod function_client;

pub use function_client::FunctionClient;

use fitscan_common::ClientScanId;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StageError;
use crate::types::{
    CommitReply, EstimateRequest, EstimateResponse, MatchRequest, MatchResponse, RefineProposal,
    RefineRequest, SemanticRequest, SemanticResponse,
};

/// Pipeline stage identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Estimate,
    Semantic,
    Match,
    Refine,
    Commit,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Estimate,
        Stage::Semantic,
        Stage::Match,
        Stage::Refine,
        Stage::Commit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Estimate => "estimate",
            Self::Semantic => "semantic",
            Self::Match => "match",
            Self::Refine => "refine",
            Self::Commit => "commit",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Converts photos and declared biometrics into raw measurements
#[async_trait::async_trait]
pub trait BodyMeasurementEstimator: Send + Sync {
    /// Any failure is fatal for the scan attempt; no fallback is synthesized.
    async fn estimate(&self, request: &EstimateRequest) -> Result<EstimateResponse, StageError>;
}

/// Converts measurements and photos into categorical descriptors
#[async_trait::async_trait]
pub trait SemanticClassifier: Send + Sync {
    async fn classify(&self, request: &SemanticRequest) -> Result<SemanticResponse, StageError>;
}

/// Nearest-archetype search returning the ranked subset and its envelope
#[async_trait::async_trait]
pub trait ArchetypeMatcher: Send + Sync {
    async fn find_matches(&self, request: &MatchRequest) -> Result<MatchResponse, StageError>;
}

/// Generative correction of the blended starting parameters
///
/// Output is advisory; the caller clamps and audits it against the envelope.
#[async_trait::async_trait]
pub trait MorphologicalRefiner: Send + Sync {
    async fn refine(&self, request: &RefineRequest) -> Result<RefineProposal, StageError>;
}

/// Persists a serialized commit payload
///
/// The body is sent verbatim; implementations must not re-encode it. Return
/// values:
/// - `Ok(None)`: no response object was received
/// - `Ok(Some(reply))`: a response object, to be interpreted by the caller
/// - `Err(_)`: the call itself failed
#[async_trait::async_trait]
pub trait CommitBackend: Send + Sync {
    async fn submit(
        &self,
        client_scan_id: &ClientScanId,
        body: &[u8],
    ) -> Result<Option<CommitReply>, StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_are_lowercase() {
        let names: Vec<&str> = Stage::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["estimate", "semantic", "match", "refine", "commit"]);
        assert_eq!(serde_json::to_value(Stage::Match).unwrap(), "match");
    }
}
