//! Estimator and classifier output checks
//!
//! A failed check is a `Contract` error for that stage. No value is repaired
//! or defaulted here.

use crate::error::StageError;
use crate::types::{EstimateResponse, SemanticResponse};

/// Validate raw measurements returned by the estimator
pub fn check_estimate(response: &EstimateResponse) -> Result<(), StageError> {
    let data = &response.extracted_data;

    if !(data.estimated_bmi.is_finite() && data.estimated_bmi > 0.0) {
        return Err(StageError::Contract(format!(
            "estimated_bmi must be a positive number, got {}",
            data.estimated_bmi
        )));
    }

    if !(0.0..=1.0).contains(&data.processing_confidence) {
        return Err(StageError::Contract(format!(
            "processing_confidence must be within [0, 1], got {}",
            data.processing_confidence
        )));
    }

    if data.raw_measurements.is_empty() {
        return Err(StageError::Contract(
            "raw_measurements is empty".to_string(),
        ));
    }

    if let Some((name, value)) = data
        .raw_measurements
        .iter()
        .find(|(_, v)| !(v.is_finite() && **v >= 0.0))
    {
        return Err(StageError::Contract(format!(
            "measurement {} is not a non-negative number: {}",
            name, value
        )));
    }

    if response.skin_tone.0.is_null() {
        return Err(StageError::Contract("skin_tone is missing".to_string()));
    }

    Ok(())
}

/// Validate the semantic classification
pub fn check_semantic(response: &SemanticResponse) -> Result<(), StageError> {
    let profile = &response.semantic_profile;
    let fields = [
        ("obesity", &profile.obesity),
        ("muscularity", &profile.muscularity),
        ("morphotype", &profile.morphotype),
        ("level", &profile.level),
    ];
    if let Some((field, _)) = fields.iter().find(|(_, tag)| tag.trim().is_empty()) {
        return Err(StageError::Contract(format!(
            "semantic_profile.{} is empty",
            field
        )));
    }

    if !(0.0..=1.0).contains(&response.semantic_confidence) {
        return Err(StageError::Contract(format!(
            "semantic_confidence must be within [0, 1], got {}",
            response.semantic_confidence
        )));
    }

    Ok(())
}
