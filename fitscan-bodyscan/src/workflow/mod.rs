//! Scan workflow
//!
//! Sequential five-stage pipeline for one scan attempt:
//! 1. **Estimate**: photos + biometrics → raw measurements
//! 2. **Semantic**: measurements + photos → categorical profile
//! 3. **Match**: measurements + profile → archetypes + envelope
//! 4. **Refine**: blended archetypes → AI proposal → local clamp and audit
//! 5. **Commit**: full aggregate, bounded retry keyed by the client scan id
//!
//! Stages 1-4 fail fast. Only commit retries.

pub mod commit;
pub mod pipeline;
pub mod refine;

pub use commit::{CommitCoordinator, CommitReceipt, CommitState, RetryPolicy};
pub use pipeline::{PipelineConfig, ScanOutcome, ScanPipeline, ScanQuality, ScanStages};
pub use refine::{check_proposal, filter_finite, reconcile};
