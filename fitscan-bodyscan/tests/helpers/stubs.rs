//! Stage Test Doubles
//!
//! `FixtureStages` answers the four fail-fast stages with canned responses.
//! `ScriptedCommit` replays a queue of commit outcomes and records every body
//! it was sent.

use async_trait::async_trait;
use fitscan_bodyscan::error::StageError;
use fitscan_bodyscan::stages::{
    ArchetypeMatcher, BodyMeasurementEstimator, CommitBackend, MorphologicalRefiner,
    SemanticClassifier, Stage,
};
use fitscan_bodyscan::types::{
    CommitReply, EstimateRequest, EstimateResponse, MatchRequest, MatchResponse, RefineProposal,
    RefineRequest, SemanticRequest, SemanticResponse,
};
use fitscan_common::ClientScanId;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::time::Instant;

use super::fixtures;

/// Canned estimate / semantic / match / refine stages
pub struct FixtureStages {
    pub estimate: EstimateResponse,
    pub semantic: SemanticResponse,
    pub matching: MatchResponse,
    pub proposal: RefineProposal,
    /// Stage that answers with a remote error
    pub fail_at: Option<Stage>,
    calls: Mutex<Vec<Stage>>,
    refine_requests: Mutex<Vec<RefineRequest>>,
}

impl Default for FixtureStages {
    fn default() -> Self {
        Self {
            estimate: fixtures::estimate_response(),
            semantic: fixtures::semantic_response(),
            matching: fixtures::match_response(),
            proposal: fixtures::refine_proposal(),
            fail_at: None,
            calls: Mutex::new(Vec::new()),
            refine_requests: Mutex::new(Vec::new()),
        }
    }
}

impl FixtureStages {
    pub fn failing_at(stage: Stage) -> Self {
        Self {
            fail_at: Some(stage),
            ..Self::default()
        }
    }

    /// Stages called so far, in order
    pub fn calls(&self) -> Vec<Stage> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_refine_request(&self) -> Option<RefineRequest> {
        self.refine_requests.lock().unwrap().last().cloned()
    }

    fn enter(&self, stage: Stage) -> Result<(), StageError> {
        self.calls.lock().unwrap().push(stage);
        if self.fail_at == Some(stage) {
            return Err(StageError::remote(
                Some(500),
                format!("{} function unavailable", stage),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BodyMeasurementEstimator for FixtureStages {
    async fn estimate(&self, _request: &EstimateRequest) -> Result<EstimateResponse, StageError> {
        self.enter(Stage::Estimate)?;
        Ok(self.estimate.clone())
    }
}

#[async_trait]
impl SemanticClassifier for FixtureStages {
    async fn classify(&self, _request: &SemanticRequest) -> Result<SemanticResponse, StageError> {
        self.enter(Stage::Semantic)?;
        Ok(self.semantic.clone())
    }
}

#[async_trait]
impl ArchetypeMatcher for FixtureStages {
    async fn find_matches(&self, _request: &MatchRequest) -> Result<MatchResponse, StageError> {
        self.enter(Stage::Match)?;
        Ok(self.matching.clone())
    }
}

#[async_trait]
impl MorphologicalRefiner for FixtureStages {
    async fn refine(&self, request: &RefineRequest) -> Result<RefineProposal, StageError> {
        self.enter(Stage::Refine)?;
        self.refine_requests.lock().unwrap().push(request.clone());
        Ok(self.proposal.clone())
    }
}

/// One scripted commit outcome
pub type CommitOutcome = Result<Option<CommitReply>, StageError>;

/// Commit backend replaying scripted outcomes
///
/// Once the script runs out every attempt succeeds.
#[derive(Default)]
pub struct ScriptedCommit {
    script: Mutex<VecDeque<CommitOutcome>>,
    bodies: Mutex<Vec<Vec<u8>>>,
    ids: Mutex<Vec<ClientScanId>>,
    times: Mutex<Vec<Instant>>,
}

impl ScriptedCommit {
    pub fn new(script: Vec<CommitOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.bodies.lock().unwrap().len()
    }

    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.bodies.lock().unwrap().clone()
    }

    pub fn ids(&self) -> Vec<ClientScanId> {
        self.ids.lock().unwrap().clone()
    }

    /// Instant each attempt reached the backend
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.times.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommitBackend for ScriptedCommit {
    async fn submit(
        &self,
        client_scan_id: &ClientScanId,
        body: &[u8],
    ) -> Result<Option<CommitReply>, StageError> {
        self.times.lock().unwrap().push(Instant::now());
        self.ids.lock().unwrap().push(client_scan_id.clone());
        self.bodies.lock().unwrap().push(body.to_vec());

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(outcome) => outcome,
            None => Ok(fixtures::ok_reply("scan-row-1")),
        }
    }
}
