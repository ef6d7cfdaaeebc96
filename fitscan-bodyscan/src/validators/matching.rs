//! Archetype matcher output assessment
//!
//! Fatal (Match stage fails):
//! - zero selected archetypes
//! - empty envelope
//! - any envelope entry whose outer bounds are non-finite or inverted
//!
//! Non-fatal (reported, pipeline continues):
//! - degraded mode (`mapping_metadata.fallback_used`)
//! - BMI relaxation
//! - envelope span / template defects
//! - template keys missing from the envelope (refinement would drop them)
//! - filtering statistics that contradict each other

use crate::error::StageError;
use crate::types::{Envelope, HardBounds, MatchResponse};
use crate::validators::envelope::{DefectKind, EnvelopeDefect};

/// Data-quality summary of one matcher response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchAssessment {
    pub fallback_used: bool,
    pub bmi_relaxation_applied: bool,
    pub defects: Vec<EnvelopeDefect>,
}

impl MatchAssessment {
    /// True when no degraded-mode flag or defect was found
    pub fn is_clean(&self) -> bool {
        !self.fallback_used && !self.bmi_relaxation_applied && self.defects.is_empty()
    }
}

/// Assess matcher output; `Err` for responses the pipeline cannot use
///
/// `hard_bounds` clamp the template spans derived for keys the envelope lacks.
pub fn assess_match(
    response: &MatchResponse,
    hard_bounds: &HardBounds,
) -> Result<MatchAssessment, StageError> {
    if response.selected_archetypes.is_empty() {
        return Err(StageError::Contract(
            "matcher returned zero archetypes".to_string(),
        ));
    }
    if response.k5_envelope.is_empty() {
        return Err(StageError::Contract(
            "matcher returned an empty envelope".to_string(),
        ));
    }

    let mut defects = response.k5_envelope.audit(&response.selected_archetypes);

    let fatal: Vec<String> = defects
        .iter()
        .filter(|d| d.is_fatal())
        .map(|d| d.to_string())
        .collect();
    if !fatal.is_empty() {
        return Err(StageError::Contract(format!(
            "unusable envelope: {}",
            fatal.join("; ")
        )));
    }

    let derived = Envelope::derive(&response.selected_archetypes, hard_bounds);
    for key in derived.keys() {
        if response.k5_envelope.get(&key).is_some() {
            continue;
        }
        if let Some(span) = derived.get(&key) {
            defects.push(EnvelopeDefect::new(
                key.clone(),
                DefectKind::UnboundedTemplateKey {
                    template_min: span.archetype_min,
                    template_max: span.archetype_max,
                },
            ));
        }
    }

    let stats = response.debug_phase_a.filtering_stats;
    if stats.after_bmi_filter > stats.total_before_filtering {
        defects.push(EnvelopeDefect::matcher(format!(
            "afterBmiFilter {} exceeds totalBeforeFiltering {}",
            stats.after_bmi_filter, stats.total_before_filtering
        )));
    }
    if stats.after_bmi_filter == 0 && stats.total_before_filtering > 0 && !stats.bmi_relaxation_applied {
        defects.push(EnvelopeDefect::matcher(
            "strict BMI filter left zero candidates but relaxation was not flagged",
        ));
    }
    if stats.bmi_relaxation_applied && stats.after_relaxation == Some(0) {
        defects.push(EnvelopeDefect::matcher(
            "BMI relaxation applied but still reported zero candidates",
        ));
    }

    Ok(MatchAssessment {
        fallback_used: response.mapping_metadata.fallback_used,
        bmi_relaxation_applied: stats.bmi_relaxation_applied,
        defects,
    })
}
