//! Test helpers for fitscan-bodyscan integration tests

#![allow(dead_code)]

pub mod fixtures;
pub mod log_capture;
pub mod stubs;

use fitscan_bodyscan::events::{EventSink, RecordingSink};
use fitscan_bodyscan::stages::CommitBackend;
use fitscan_bodyscan::workflow::{PipelineConfig, ScanPipeline, ScanStages};
use std::sync::Arc;

use stubs::FixtureStages;

/// Build a pipeline over fixture stages and the given commit backend
///
/// Returns the pipeline and the sink receiving its events.
pub fn pipeline(
    stages: Arc<FixtureStages>,
    commit: Arc<dyn CommitBackend>,
    config: PipelineConfig,
) -> (ScanPipeline, RecordingSink) {
    let sink = RecordingSink::new();
    let pipeline = pipeline_with_sink(stages, commit, config, Arc::new(sink.clone()));
    (pipeline, sink)
}

/// Build a pipeline recording its events to `sink`
pub fn pipeline_with_sink(
    stages: Arc<FixtureStages>,
    commit: Arc<dyn CommitBackend>,
    config: PipelineConfig,
    sink: Arc<dyn EventSink>,
) -> ScanPipeline {
    let stages = ScanStages {
        estimator: stages.clone(),
        classifier: stages.clone(),
        matcher: stages.clone(),
        refiner: stages,
        commit,
    };
    ScanPipeline::new(stages, config, sink)
}
