//! Scan pipeline orchestrator
//!
//! Runs the five stages for one scan attempt and threads the client scan id
//! through every call. Each stage starts only after the previous one
//! resolved; nothing is persisted before commit.

use fitscan_common::ClientScanId;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ScanError, StageError};
use crate::events::{EventSink, FanoutSink, RecordingSink, ScanEvent};
use crate::fusion::{blend_archetypes, SemanticIndexTable};
use crate::stages::{
    ArchetypeMatcher, BodyMeasurementEstimator, CommitBackend, MorphologicalRefiner,
    SemanticClassifier, Stage,
};
use crate::types::{
    CommitPayload, EstimateRequest, HardBounds, MatchRequest, MatchingConfig, PhotoMetadata,
    RefineRequest, ScanRequest, SemanticRequest, UserMeasurements,
};
use crate::validators::{assess_match, check_estimate, check_semantic};
use crate::workflow::commit::{CommitCoordinator, CommitReceipt, RetryPolicy};
use crate::workflow::refine::{check_proposal, filter_finite, reconcile, remote_audit_disagrees};

/// Mapping version recorded when the matcher does not report one
pub const DEFAULT_MAPPING_VERSION: &str = "unversioned";

/// Stage implementations used by the pipeline
#[derive(Clone)]
pub struct ScanStages {
    pub estimator: Arc<dyn BodyMeasurementEstimator>,
    pub classifier: Arc<dyn SemanticClassifier>,
    pub matcher: Arc<dyn ArchetypeMatcher>,
    pub refiner: Arc<dyn MorphologicalRefiner>,
    pub commit: Arc<dyn CommitBackend>,
}

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub match_limit: u32,
    pub retry: RetryPolicy,
    pub indices: SemanticIndexTable,
    pub hard_bounds: HardBounds,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            match_limit: 5,
            retry: RetryPolicy::default(),
            indices: SemanticIndexTable::default(),
            hard_bounds: HardBounds::default(),
        }
    }
}

/// Data-quality summary of a completed scan
///
/// A scan with any flag set is usable but lower precision.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanQuality {
    pub fallback_used: bool,
    pub bmi_relaxation_applied: bool,
    pub envelope_defects: usize,
    pub unknown_semantic_tags: usize,
    pub dropped_blend_limb_masses: usize,
    pub clamped: usize,
    pub missing_keys_added: usize,
    pub extra_keys_removed: usize,
    pub remote_audit_mismatch: bool,
}

impl ScanQuality {
    pub fn is_high_confidence(&self) -> bool {
        *self == ScanQuality::default()
    }
}

/// Result of a committed scan attempt
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub client_scan_id: ClientScanId,
    pub receipt: CommitReceipt,
    pub quality: ScanQuality,
    pub payload: CommitPayload,
    /// Every event recorded during this attempt, in order
    pub events: Vec<ScanEvent>,
}

/// Five-stage scan orchestrator
pub struct ScanPipeline {
    stages: ScanStages,
    config: PipelineConfig,
    sink: Arc<dyn EventSink>,
}

impl ScanPipeline {
    pub fn new(stages: ScanStages, config: PipelineConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            stages,
            config,
            sink,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one scan attempt end to end
    pub async fn run(&self, request: ScanRequest) -> Result<ScanOutcome, ScanError> {
        request.validate().map_err(ScanError::InvalidRequest)?;

        let started = Instant::now();
        let recorder = RecordingSink::new();
        let sink: Arc<dyn EventSink> = Arc::new(
            FanoutSink::new()
                .with(self.sink.clone())
                .with(Arc::new(recorder.clone())),
        );
        let run = StageRunner {
            client_scan_id: &request.client_scan_id,
            sink: sink.as_ref(),
        };
        let id = &request.client_scan_id;
        let gender = request.biometrics.gender;
        let mut quality = ScanQuality::default();

        // Stage 1: Estimate
        let estimate_request = EstimateRequest {
            client_scan_id: id.clone(),
            photos: request.photos.clone(),
            height_cm: request.biometrics.height_cm,
            weight_kg: request.biometrics.weight_kg,
            gender,
        };
        let estimate = run
            .stage(Stage::Estimate, async {
                let response = self.stages.estimator.estimate(&estimate_request).await?;
                check_estimate(&response)?;
                Ok(response)
            })
            .await?;

        // Stage 2: Semantic classification
        let semantic_request = SemanticRequest {
            client_scan_id: id.clone(),
            user_id: request.user_id.clone(),
            photos: request.photos.clone(),
            extracted_data: estimate.extracted_data.clone(),
            gender,
        };
        let semantic = run
            .stage(Stage::Semantic, async {
                let response = self.stages.classifier.classify(&semantic_request).await?;
                check_semantic(&response)?;
                Ok(response)
            })
            .await?;

        let (indices, unknown_tags) = self.config.indices.derive(&semantic.semantic_profile);
        quality.unknown_semantic_tags = unknown_tags.len();
        for unknown in unknown_tags {
            sink.record(&ScanEvent::UnknownSemanticTag {
                client_scan_id: id.clone(),
                field: unknown.field.to_string(),
                tag: unknown.tag,
            });
        }

        // Stage 3: Archetype matching
        let match_request = MatchRequest {
            user_id: request.user_id.clone(),
            extracted_data: estimate.extracted_data.clone(),
            semantic_profile: semantic.semantic_profile.clone(),
            indices,
            matching_config: MatchingConfig {
                gender,
                limit: self.config.match_limit,
            },
        };
        let (matching, assessment) = run
            .stage(Stage::Match, async {
                let response = self.stages.matcher.find_matches(&match_request).await?;
                let assessment = assess_match(&response, &self.config.hard_bounds)?;
                Ok((response, assessment))
            })
            .await?;

        quality.fallback_used = assessment.fallback_used;
        quality.bmi_relaxation_applied = assessment.bmi_relaxation_applied;
        quality.envelope_defects = assessment.defects.len();
        if assessment.fallback_used {
            sink.record(&ScanEvent::MatcherFallbackUsed {
                client_scan_id: id.clone(),
                strategy: matching.strategy_used.clone(),
            });
        }
        if assessment.bmi_relaxation_applied {
            let stats = matching.debug_phase_a.filtering_stats;
            sink.record(&ScanEvent::BmiRelaxationApplied {
                client_scan_id: id.clone(),
                total_before_filtering: stats.total_before_filtering,
                after_bmi_filter: stats.after_bmi_filter,
            });
        }
        for defect in &assessment.defects {
            sink.record(&ScanEvent::EnvelopeDefect {
                client_scan_id: id.clone(),
                key: defect.key.clone(),
                detail: defect.to_string(),
            });
        }

        // Stage 4: Refinement
        let blend = blend_archetypes(&matching.selected_archetypes, &matching.k5_envelope);
        let (blend_limb_masses, dropped) = filter_finite(&blend.limb_masses);
        quality.dropped_blend_limb_masses = dropped.len();
        if !dropped.is_empty() {
            sink.record(&ScanEvent::BlendLimbMassesFiltered {
                client_scan_id: id.clone(),
                dropped: dropped.clone(),
            });
        }

        let mapping_version = match &matching.mapping_metadata.mapping_version {
            Some(version) => version.clone(),
            None => {
                tracing::debug!(
                    client_scan_id = id.as_str(),
                    "Matcher reported no mapping version, using {}",
                    DEFAULT_MAPPING_VERSION
                );
                DEFAULT_MAPPING_VERSION.to_string()
            }
        };

        let refine_request = RefineRequest {
            scan_id: id.clone(),
            resolved_gender: gender,
            photos: request.photos.clone(),
            blend_shape_params: blend.shape_params.clone(),
            blend_limb_masses,
            mapping_version: mapping_version.clone(),
            k5_envelope: matching.k5_envelope.clone(),
            vision_classification: semantic.semantic_profile.clone(),
            user_measurements: UserMeasurements {
                height_cm: request.biometrics.height_cm,
                weight_kg: request.biometrics.weight_kg,
                estimated_bmi: estimate.extracted_data.estimated_bmi,
                raw_measurements: estimate.extracted_data.raw_measurements.clone(),
            },
        };
        let proposal = run
            .stage(Stage::Refine, async {
                let proposal = self.stages.refiner.refine(&refine_request).await?;
                check_proposal(&proposal, &matching.k5_envelope)?;
                Ok(proposal)
            })
            .await?;

        let mut refinement = reconcile(
            &proposal,
            &matching.k5_envelope,
            &blend,
            &self.config.hard_bounds,
        );
        refinement.dropped_blend_limb_masses = dropped;

        quality.clamped = refinement.clamped_keys.len();
        quality.missing_keys_added = refinement.missing_keys_added.len();
        quality.extra_keys_removed = refinement.extra_keys_removed.len();
        sink.record(&ScanEvent::RefinementAudited {
            client_scan_id: id.clone(),
            clamped: refinement.clamped_keys.len(),
            envelope_violations: refinement.envelope_violations.len(),
            db_violations: refinement.db_violations.len(),
            missing_keys_added: refinement.missing_keys_added.len(),
            extra_keys_removed: refinement.extra_keys_removed.len(),
            rejected_ai_values: refinement.rejected_ai_values.len(),
        });
        if remote_audit_disagrees(&refinement) {
            quality.remote_audit_mismatch = true;
            sink.record(&ScanEvent::RemoteAuditMismatch {
                client_scan_id: id.clone(),
                remote: refinement.remote_audit.clone(),
                local_out_of_range: refinement.out_of_range_count,
            });
        }

        // Stage 5: Commit
        let payload = CommitPayload {
            client_scan_id: id.clone(),
            user_id: request.user_id.clone(),
            resolved_gender: gender,
            skin_tone: estimate.skin_tone.clone(),
            mapping_version,
            photos: request.photos.iter().map(PhotoMetadata::from).collect(),
            biometrics: request.biometrics,
            extracted_data: estimate.extracted_data,
            semantic,
            semantic_indices: indices,
            matching,
            refinement,
        };

        let coordinator =
            CommitCoordinator::new(self.stages.commit.clone(), self.config.retry, sink.clone());
        sink.record(&ScanEvent::StageStarted {
            client_scan_id: id.clone(),
            stage: Stage::Commit,
        });
        let commit_started = Instant::now();
        let receipt = match coordinator.commit(&payload).await {
            Ok(receipt) => receipt,
            Err(err) => {
                sink.record(&ScanEvent::StageFailed {
                    client_scan_id: id.clone(),
                    stage: Stage::Commit,
                    error: err.to_string(),
                });
                return Err(err);
            }
        };
        sink.record(&ScanEvent::StageCompleted {
            client_scan_id: id.clone(),
            stage: Stage::Commit,
            duration_ms: commit_started.elapsed().as_millis() as u64,
        });

        sink.record(&ScanEvent::ScanCompleted {
            client_scan_id: id.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        });

        Ok(ScanOutcome {
            client_scan_id: id.clone(),
            receipt,
            quality,
            payload,
            events: recorder.events(),
        })
    }
}

/// Wraps one fail-fast stage call with events and error tagging
struct StageRunner<'a> {
    client_scan_id: &'a ClientScanId,
    sink: &'a dyn EventSink,
}

impl StageRunner<'_> {
    async fn stage<T, F>(&self, stage: Stage, call: F) -> Result<T, ScanError>
    where
        F: Future<Output = Result<T, StageError>>,
    {
        self.sink.record(&ScanEvent::StageStarted {
            client_scan_id: self.client_scan_id.clone(),
            stage,
        });
        let started = Instant::now();

        match call.await {
            Ok(value) => {
                self.sink.record(&ScanEvent::StageCompleted {
                    client_scan_id: self.client_scan_id.clone(),
                    stage,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                Ok(value)
            }
            Err(source) => {
                self.sink.record(&ScanEvent::StageFailed {
                    client_scan_id: self.client_scan_id.clone(),
                    stage,
                    error: source.to_string(),
                });
                Err(ScanError::Stage {
                    client_scan_id: self.client_scan_id.clone(),
                    stage,
                    source,
                })
            }
        }
    }
}
