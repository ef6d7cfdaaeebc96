//! Scan Fixtures
//!
//! A consistent set of stage responses for a 175 cm / 73.5 kg male scan
//! (declared BMI 24.0) matched against two archetypes.

use fitscan_bodyscan::types::{
    Archetype, BmiRange, CaptureReport, CommitAck, CommitReply, DebugPhaseA, DeclaredBiometrics,
    Envelope, EstimateResponse, FilteringStats, Gender, MappingMetadata, MatchResponse,
    ParamRange, PhotoView, RawMeasurements, RefineProposal, RemoteError, ScanPhoto, ScanRequest,
    SemanticProfile, SemanticResponse, SkinTone,
};
use fitscan_common::ClientScanId;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub fn scan_id(id: &str) -> ClientScanId {
    ClientScanId::parse(id).unwrap()
}

pub fn photo(view: PhotoView, url: &str) -> ScanPhoto {
    ScanPhoto {
        view,
        url: url.to_string(),
        report: CaptureReport {
            ok: true,
            ..CaptureReport::default()
        },
    }
}

pub fn scan_request(id: &str) -> ScanRequest {
    ScanRequest {
        client_scan_id: scan_id(id),
        user_id: "user-42".to_string(),
        photos: vec![
            photo(PhotoView::Front, "scans/user-42/front.jpg"),
            photo(PhotoView::Side, "scans/user-42/side.jpg"),
        ],
        biometrics: DeclaredBiometrics {
            height_cm: 175.0,
            weight_kg: 73.5,
            gender: Gender::Male,
        },
    }
}

pub fn estimate_response() -> EstimateResponse {
    let raw_measurements: BTreeMap<String, f64> = [
        ("chest_cm".to_string(), 98.0),
        ("waist_cm".to_string(), 84.0),
        ("hip_cm".to_string(), 97.0),
    ]
    .into_iter()
    .collect();

    EstimateResponse {
        extracted_data: RawMeasurements {
            raw_measurements,
            estimated_bmi: 24.0,
            processing_confidence: 0.9,
        },
        skin_tone: SkinTone(json!({ "hex": "#c68642", "fitzpatrick": 4 })),
    }
}

pub fn semantic_response() -> SemanticResponse {
    SemanticResponse {
        semantic_profile: SemanticProfile {
            obesity: "normal".to_string(),
            muscularity: "moderate".to_string(),
            morphotype: "mesomorph".to_string(),
            level: "average".to_string(),
        },
        semantic_confidence: 0.85,
        adjustments_made: Vec::new(),
    }
}

fn range(min: f64, max: f64, archetype_min: f64, archetype_max: f64) -> ParamRange {
    ParamRange {
        min,
        max,
        archetype_min,
        archetype_max,
    }
}

/// Envelope keys: shape `belly`, `chest`; limb masses `arm_left`, `leg_left`
pub fn envelope() -> Envelope {
    let mut envelope = Envelope::default();
    envelope
        .shape_params
        .insert("belly".to_string(), range(0.0, 1.0, 0.2, 0.6));
    envelope
        .shape_params
        .insert("chest".to_string(), range(-1.0, 1.0, -0.5, 0.5));
    envelope
        .limb_masses
        .insert("arm_left".to_string(), range(2.0, 6.0, 3.0, 5.0));
    envelope
        .limb_masses
        .insert("leg_left".to_string(), range(8.0, 14.0, 9.0, 13.0));
    envelope
}

pub fn params(values: &[(&str, Value)]) -> Map<String, Value> {
    values
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn archetype(id: &str, score: f64, shape: Map<String, Value>, limbs: Map<String, Value>) -> Archetype {
    Archetype {
        id: id.to_string(),
        name: Some(format!("Archetype {}", id)),
        bmi_range: BmiRange {
            min: 22.0,
            max: 26.0,
        },
        obesity: "normal".to_string(),
        score: Some(score),
        shape_params: shape,
        limb_masses: limbs,
    }
}

/// Two archetypes weighted 0.6 / 0.4, all template values inside the spans
pub fn archetypes() -> Vec<Archetype> {
    vec![
        archetype(
            "m-athletic-03",
            0.6,
            params(&[("belly", json!(0.3)), ("chest", json!(0.1))]),
            params(&[("arm_left", json!(4.0)), ("leg_left", json!(10.0))]),
        ),
        archetype(
            "m-average-07",
            0.4,
            params(&[("belly", json!(0.5)), ("chest", json!(-0.1))]),
            params(&[("arm_left", json!(4.5)), ("leg_left", json!(12.0))]),
        ),
    ]
}

pub fn match_response() -> MatchResponse {
    MatchResponse {
        selected_archetypes: archetypes(),
        strategy_used: "semantic_primary".to_string(),
        semantic_coherence_score: 0.91,
        k5_envelope: envelope(),
        mapping_metadata: MappingMetadata {
            fallback_used: false,
            mapping_version: Some("v3".to_string()),
        },
        debug_phase_a: DebugPhaseA {
            filtering_stats: FilteringStats {
                total_before_filtering: 40,
                after_bmi_filter: 12,
                bmi_relaxation_applied: false,
                after_relaxation: None,
            },
        },
    }
}

/// A refiner proposal with every key present and inside the envelope
pub fn refine_proposal() -> RefineProposal {
    RefineProposal {
        final_shape_params: params(&[("belly", json!(0.4)), ("chest", json!(0.0))]),
        final_limb_masses: params(&[("arm_left", json!(4.2)), ("leg_left", json!(11.0))]),
        ai_confidence: Some(0.8),
        ..RefineProposal::default()
    }
}

pub fn ok_reply(scan_id: &str) -> Option<CommitReply> {
    Some(CommitReply {
        data: Some(CommitAck {
            scan_id: Some(scan_id.to_string()),
            success: Some(true),
            processing_complete: Some(true),
        }),
        error: None,
    })
}

pub fn error_reply(message: &str) -> Option<CommitReply> {
    Some(CommitReply {
        data: None,
        error: Some(RemoteError {
            message: message.to_string(),
            code: None,
            status: Some(503),
        }),
    })
}
