//! Scan observability events
//!
//! Every stage transition, clamp audit, matcher flag and commit attempt is
//! reported as a [`ScanEvent`] to an [`EventSink`]. Sinks never fail and never
//! influence control flow.
//!
//! Sinks:
//! - [`TracingSink`]: structured `tracing` output (default)
//! - [`BroadcastSink`]: `tokio::broadcast` fan-out for live subscribers
//! - [`RecordingSink`]: in-memory list, for tests and diagnostics
//! - [`FanoutSink`]: forwards to several sinks

use fitscan_common::ClientScanId;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::stages::Stage;
use crate::types::{ParamKey, RemoteAudit};

/// Structured scan event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ScanEvent {
    StageStarted {
        client_scan_id: ClientScanId,
        stage: Stage,
    },
    StageCompleted {
        client_scan_id: ClientScanId,
        stage: Stage,
        duration_ms: u64,
    },
    StageFailed {
        client_scan_id: ClientScanId,
        stage: Stage,
        error: String,
    },
    /// Matcher served the static fallback mapping instead of live archetypes
    MatcherFallbackUsed {
        client_scan_id: ClientScanId,
        strategy: String,
    },
    /// Matcher widened its BMI window to find candidates
    BmiRelaxationApplied {
        client_scan_id: ClientScanId,
        total_before_filtering: u32,
        after_bmi_filter: u32,
    },
    /// Non-fatal inconsistency in the matcher's output
    EnvelopeDefect {
        client_scan_id: ClientScanId,
        key: Option<ParamKey>,
        detail: String,
    },
    UnknownSemanticTag {
        client_scan_id: ClientScanId,
        field: String,
        tag: String,
    },
    /// Non-finite blend limb masses removed before the refine call
    BlendLimbMassesFiltered {
        client_scan_id: ClientScanId,
        dropped: Vec<String>,
    },
    /// Local clamp audit after refinement
    RefinementAudited {
        client_scan_id: ClientScanId,
        clamped: usize,
        envelope_violations: usize,
        db_violations: usize,
        missing_keys_added: usize,
        extra_keys_removed: usize,
        rejected_ai_values: usize,
    },
    /// Remote refiner reported different audit counts than local clamping found
    RemoteAuditMismatch {
        client_scan_id: ClientScanId,
        remote: RemoteAudit,
        local_out_of_range: u32,
    },
    CommitAttemptFailed {
        client_scan_id: ClientScanId,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    CommitSucceeded {
        client_scan_id: ClientScanId,
        attempt: u32,
        scan_id: Option<String>,
    },
    CommitExhausted {
        client_scan_id: ClientScanId,
        attempts: u32,
        last_error: String,
    },
    ScanCompleted {
        client_scan_id: ClientScanId,
        duration_ms: u64,
    },
}

impl ScanEvent {
    pub fn client_scan_id(&self) -> &ClientScanId {
        match self {
            Self::StageStarted { client_scan_id, .. }
            | Self::StageCompleted { client_scan_id, .. }
            | Self::StageFailed { client_scan_id, .. }
            | Self::MatcherFallbackUsed { client_scan_id, .. }
            | Self::BmiRelaxationApplied { client_scan_id, .. }
            | Self::EnvelopeDefect { client_scan_id, .. }
            | Self::UnknownSemanticTag { client_scan_id, .. }
            | Self::BlendLimbMassesFiltered { client_scan_id, .. }
            | Self::RefinementAudited { client_scan_id, .. }
            | Self::RemoteAuditMismatch { client_scan_id, .. }
            | Self::CommitAttemptFailed { client_scan_id, .. }
            | Self::CommitSucceeded { client_scan_id, .. }
            | Self::CommitExhausted { client_scan_id, .. }
            | Self::ScanCompleted { client_scan_id, .. } => client_scan_id,
        }
    }

    /// Short event name, used in logs and tests
    pub fn name(&self) -> &'static str {
        match self {
            Self::StageStarted { .. } => "stage_started",
            Self::StageCompleted { .. } => "stage_completed",
            Self::StageFailed { .. } => "stage_failed",
            Self::MatcherFallbackUsed { .. } => "matcher_fallback_used",
            Self::BmiRelaxationApplied { .. } => "bmi_relaxation_applied",
            Self::EnvelopeDefect { .. } => "envelope_defect",
            Self::UnknownSemanticTag { .. } => "unknown_semantic_tag",
            Self::BlendLimbMassesFiltered { .. } => "blend_limb_masses_filtered",
            Self::RefinementAudited { .. } => "refinement_audited",
            Self::RemoteAuditMismatch { .. } => "remote_audit_mismatch",
            Self::CommitAttemptFailed { .. } => "commit_attempt_failed",
            Self::CommitSucceeded { .. } => "commit_succeeded",
            Self::CommitExhausted { .. } => "commit_exhausted",
            Self::ScanCompleted { .. } => "scan_completed",
        }
    }
}

/// Destination for scan events
pub trait EventSink: Send + Sync {
    fn record(&self, event: &ScanEvent);
}

/// Logs events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &ScanEvent) {
        let id = event.client_scan_id().as_str();
        match event {
            ScanEvent::StageStarted { stage, .. } => {
                debug!(client_scan_id = id, stage = stage.as_str(), "Stage started");
            }
            ScanEvent::StageCompleted {
                stage, duration_ms, ..
            } => {
                info!(
                    client_scan_id = id,
                    stage = stage.as_str(),
                    duration_ms,
                    "Stage completed"
                );
            }
            ScanEvent::StageFailed { stage, error, .. } => {
                error!(
                    client_scan_id = id,
                    stage = stage.as_str(),
                    error = %error,
                    "Stage failed"
                );
            }
            ScanEvent::MatcherFallbackUsed { strategy, .. } => {
                warn!(client_scan_id = id, strategy = %strategy, "Matcher used fallback mapping");
            }
            ScanEvent::BmiRelaxationApplied {
                total_before_filtering,
                after_bmi_filter,
                ..
            } => {
                warn!(
                    client_scan_id = id,
                    total_before_filtering,
                    after_bmi_filter,
                    "Matcher relaxed BMI filter"
                );
            }
            ScanEvent::EnvelopeDefect { key, detail, .. } => {
                warn!(
                    client_scan_id = id,
                    key = key.as_ref().map(|k| k.to_string()).unwrap_or_default(),
                    detail = %detail,
                    "Envelope defect"
                );
            }
            ScanEvent::UnknownSemanticTag { field, tag, .. } => {
                warn!(client_scan_id = id, field = %field, tag = %tag, "Unknown semantic tag");
            }
            ScanEvent::BlendLimbMassesFiltered { dropped, .. } => {
                warn!(
                    client_scan_id = id,
                    dropped = ?dropped,
                    "Dropped non-finite blend limb masses"
                );
            }
            ScanEvent::RefinementAudited {
                clamped,
                envelope_violations,
                db_violations,
                missing_keys_added,
                extra_keys_removed,
                rejected_ai_values,
                ..
            } => {
                info!(
                    client_scan_id = id,
                    clamped,
                    envelope_violations,
                    db_violations,
                    missing_keys_added,
                    extra_keys_removed,
                    rejected_ai_values,
                    "Refinement audited"
                );
            }
            ScanEvent::RemoteAuditMismatch {
                remote,
                local_out_of_range,
                ..
            } => {
                warn!(
                    client_scan_id = id,
                    remote = ?remote,
                    local_out_of_range,
                    "Remote refiner audit disagrees with local clamping"
                );
            }
            ScanEvent::CommitAttemptFailed {
                attempt,
                max_attempts,
                error,
                ..
            } => {
                warn!(
                    client_scan_id = id,
                    attempt,
                    max_attempts,
                    error = %error,
                    "Commit attempt failed"
                );
            }
            ScanEvent::CommitSucceeded {
                attempt, scan_id, ..
            } => {
                info!(
                    client_scan_id = id,
                    attempt,
                    scan_id = scan_id.as_deref().unwrap_or(""),
                    "Commit succeeded"
                );
            }
            ScanEvent::CommitExhausted {
                attempts,
                last_error,
                ..
            } => {
                error!(
                    client_scan_id = id,
                    attempts,
                    last_error = %last_error,
                    "Commit retries exhausted"
                );
            }
            ScanEvent::ScanCompleted { duration_ms, .. } => {
                info!(client_scan_id = id, duration_ms, "Scan completed");
            }
        }
    }
}

/// Forwards events to live subscribers
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ScanEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn record(&self, event: &ScanEvent) {
        if self.tx.send(event.clone()).is_err() {
            // No receivers
            debug!("No subscribers for scan event {}", event.name());
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ScanEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ScanEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(ScanEvent::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: &ScanEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

/// Sends each event to every inner sink, in order
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn record(&self, event: &ScanEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}
