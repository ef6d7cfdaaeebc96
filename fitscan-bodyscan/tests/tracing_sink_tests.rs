//! TracingSink log level and field tests

mod helpers;

use fitscan_bodyscan::events::{EventSink, ScanEvent, TracingSink};
use fitscan_bodyscan::stages::Stage;
use fitscan_bodyscan::types::ParamKey;
use tracing::Level;

use helpers::fixtures;
use helpers::log_capture::LogCapture;

#[test]
fn test_data_quality_events_log_at_warn() {
    let capture = LogCapture::new();
    let id = fixtures::scan_id("scan-log");

    capture.capture(|| {
        TracingSink.record(&ScanEvent::MatcherFallbackUsed {
            client_scan_id: id.clone(),
            strategy: "bmi_only".to_string(),
        });
        TracingSink.record(&ScanEvent::EnvelopeDefect {
            client_scan_id: id.clone(),
            key: Some(ParamKey::shape("belly")),
            detail: "archetype span outside bounds".to_string(),
        });
    });

    let fallback = capture.find("fallback").expect("fallback logged");
    assert_eq!(fallback.level, Level::WARN);
    assert_eq!(fallback.fields["client_scan_id"], "scan-log");
    assert_eq!(fallback.fields["strategy"], "bmi_only");

    let defect = capture.find("Envelope defect").expect("defect logged");
    assert_eq!(defect.level, Level::WARN);
    assert_eq!(defect.fields["key"], "shape:belly");
}

#[test]
fn test_failures_log_at_error_with_stage() {
    let capture = LogCapture::new();
    let id = fixtures::scan_id("scan-log-err");

    capture.capture(|| {
        TracingSink.record(&ScanEvent::StageFailed {
            client_scan_id: id.clone(),
            stage: Stage::Semantic,
            error: "classifier timeout".to_string(),
        });
        TracingSink.record(&ScanEvent::CommitExhausted {
            client_scan_id: id.clone(),
            attempts: 3,
            last_error: "third".to_string(),
        });
    });

    let failed = capture.find("Stage failed").unwrap();
    assert_eq!(failed.level, Level::ERROR);
    assert_eq!(failed.fields["stage"], "semantic");
    assert_eq!(failed.fields["error"], "classifier timeout");

    let exhausted = capture.find("exhausted").unwrap();
    assert_eq!(exhausted.level, Level::ERROR);
    assert_eq!(exhausted.fields["last_error"], "third");
}

#[test]
fn test_progress_events_log_at_info() {
    let capture = LogCapture::new();

    capture.capture(|| {
        TracingSink.record(&ScanEvent::ScanCompleted {
            client_scan_id: fixtures::scan_id("scan-log-ok"),
            duration_ms: 1200,
        });
    });

    capture.assert_contains("Scan completed");
    let record = capture.find("Scan completed").unwrap();
    assert_eq!(record.level, Level::INFO);
    assert_eq!(record.fields["duration_ms"], "1200");
}
