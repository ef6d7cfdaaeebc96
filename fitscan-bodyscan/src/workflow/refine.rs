//! Refinement reconciliation
//!
//! The refiner's output is advisory. [`reconcile`] rebuilds the final
//! parameter maps from the envelope's key set:
//!
//! - finite AI value inside bounds: kept
//! - finite AI value outside bounds: clamped to the nearest bound, key recorded
//!   in `clamped_keys`
//! - missing, null, non-numeric or non-finite AI value: filled from the blend
//!   value, else the archetype-span midpoint, key recorded in `missing_keys_added`
//! - AI key not in the envelope: dropped, recorded in `extra_keys_removed`
//!
//! Bounds are the envelope's `[min, max]` intersected with the database hard
//! bounds for that key. When the two ranges do not overlap the envelope wins.
//!
//! Precondition: the envelope passed [`crate::validators::assess_match`], so
//! every entry has finite, ordered outer bounds.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::StageError;
use crate::fusion::ArchetypeBlend;
use crate::types::{
    BoundViolation, Envelope, FillSource, HardBounds, MissingKeyFill, ParamKey, ParamKind,
    ParamRange, RefineProposal, RefinementResult, RemoteAudit,
};

/// Split a JSON parameter map into finite numbers and the keys that were not
pub fn filter_finite(params: &Map<String, Value>) -> (BTreeMap<String, f64>, Vec<String>) {
    let mut kept = BTreeMap::new();
    let mut dropped = Vec::new();

    for (name, value) in params {
        match value.as_f64().filter(|v| v.is_finite()) {
            Some(v) => {
                kept.insert(name.clone(), v);
            }
            None => dropped.push(name.clone()),
        }
    }

    (kept, dropped)
}

/// Reject a proposal with no finite value for any envelope key
///
/// Reconciliation would otherwise rebuild every key from the blend.
pub fn check_proposal(proposal: &RefineProposal, envelope: &Envelope) -> Result<(), StageError> {
    let has_value = envelope.keys().any(|key| {
        proposal
            .params(key.kind)
            .get(&key.name)
            .and_then(Value::as_f64)
            .is_some_and(f64::is_finite)
    });
    if has_value {
        Ok(())
    } else {
        Err(StageError::Contract(
            "refiner returned no parameters".to_string(),
        ))
    }
}

/// Enforced range for one key
fn effective_bounds(range: &ParamRange, hard: Option<(f64, f64)>) -> (f64, f64) {
    match hard {
        Some((hard_min, hard_max)) => {
            let lo = range.min.max(hard_min);
            let hi = range.max.min(hard_max);
            if lo <= hi {
                (lo, hi)
            } else {
                (range.min, range.max)
            }
        }
        None => (range.min, range.max),
    }
}

fn clamp_to(value: f64, (lo, hi): (f64, f64)) -> f64 {
    value.max(lo).min(hi)
}

fn remote_audit(proposal: &RefineProposal) -> RemoteAudit {
    RemoteAudit {
        clamped: proposal.clamped_keys.len(),
        envelope_violations: proposal.envelope_violations.len(),
        db_violations: proposal.db_violations.len(),
        missing_keys_added: proposal.missing_keys_added.len(),
        extra_keys_removed: proposal.extra_keys_removed.len(),
        out_of_range_count: proposal.out_of_range_count,
    }
}

/// Clamp and audit a refiner proposal against the envelope and hard bounds
pub fn reconcile(
    proposal: &RefineProposal,
    envelope: &Envelope,
    blend: &ArchetypeBlend,
    hard_bounds: &HardBounds,
) -> RefinementResult {
    let mut result = RefinementResult {
        ai_confidence: proposal.ai_confidence.filter(|c| c.is_finite()),
        remote_audit: remote_audit(proposal),
        ..RefinementResult::default()
    };

    for key in envelope.keys() {
        let Some(range) = envelope.get(&key) else {
            continue;
        };
        let hard = hard_bounds.get(&key);
        let bounds = effective_bounds(range, hard);
        let proposed = proposal.params(key.kind).get(&key.name);

        let final_value = match proposed.and_then(Value::as_f64).filter(|v| v.is_finite()) {
            Some(value) => {
                if !range.contains(value) {
                    result.envelope_violations.push(BoundViolation {
                        key: key.clone(),
                        value,
                        min: range.min,
                        max: range.max,
                    });
                }
                if let Some((hard_min, hard_max)) = hard {
                    if value < hard_min || value > hard_max {
                        result.db_violations.push(BoundViolation {
                            key: key.clone(),
                            value,
                            min: hard_min,
                            max: hard_max,
                        });
                    }
                }

                let clamped = clamp_to(value, bounds);
                if clamped != value {
                    result.clamped_keys.push(key.clone());
                }
                clamped
            }
            None => {
                if proposed.is_some_and(|v| !v.is_null()) {
                    result.rejected_ai_values.push(key.clone());
                }
                let (value, source) = match blend.value(&key) {
                    Some(v) => (clamp_to(v, bounds), FillSource::Blend),
                    None => (
                        clamp_to(range.archetype_midpoint(), bounds),
                        FillSource::ArchetypeMidpoint,
                    ),
                };
                result.missing_keys_added.push(MissingKeyFill {
                    key: key.clone(),
                    value,
                    source,
                });
                value
            }
        };

        match key.kind {
            ParamKind::Shape => result.final_shape_params.insert(key.name, final_value),
            ParamKind::LimbMass => result.final_limb_masses.insert(key.name, final_value),
        };
    }

    for kind in ParamKind::ALL {
        let known = envelope.params(kind);
        for name in proposal.params(kind).keys() {
            if !known.contains_key(name) {
                result.extra_keys_removed.push(ParamKey::new(kind, name.clone()));
            }
        }
    }

    result.out_of_range_count = result.clamped_keys.len() as u32;
    result
}

/// True when the refiner's self-reported audit disagrees with local clamping
pub fn remote_audit_disagrees(result: &RefinementResult) -> bool {
    let remote = &result.remote_audit;
    let remote_count = remote
        .out_of_range_count
        .unwrap_or(remote.clamped as u32);
    remote_count != result.out_of_range_count
        || remote.extra_keys_removed != result.extra_keys_removed.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn range(min: f64, max: f64, amin: f64, amax: f64) -> ParamRange {
        ParamRange {
            min,
            max,
            archetype_min: amin,
            archetype_max: amax,
        }
    }

    fn envelope() -> Envelope {
        let mut e = Envelope::default();
        e.shape_params.insert("waist".to_string(), range(-1.0, 1.0, -0.4, 0.4));
        e.shape_params.insert("chest".to_string(), range(-1.0, 1.0, 0.0, 0.6));
        e.shape_params.insert("hips".to_string(), range(-2.0, 2.0, -1.0, 0.0));
        e.limb_masses.insert("left_arm".to_string(), range(2.0, 5.0, 3.0, 4.0));
        e.limb_masses.insert("torso".to_string(), range(20.0, 40.0, 25.0, 35.0));
        e
    }

    fn proposal(shape: Value, limbs: Value) -> RefineProposal {
        RefineProposal {
            final_shape_params: shape.as_object().cloned().unwrap_or_default(),
            final_limb_masses: limbs.as_object().cloned().unwrap_or_default(),
            ..RefineProposal::default()
        }
    }

    #[test]
    fn test_filter_finite_splits_values() {
        let params = json!({"a": 1.5, "b": null, "c": "heavy", "d": 0}).as_object().cloned().unwrap();
        let (kept, dropped) = filter_finite(&params);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept["d"], 0.0);
        assert_eq!(dropped, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_overshoot_clamped_to_envelope_max() {
        let p = proposal(
            json!({"waist": 1.5, "chest": 0.2, "hips": -0.5}),
            json!({"left_arm": 3.5, "torso": 30.0}),
        );
        let result = reconcile(&p, &envelope(), &ArchetypeBlend::default(), &HardBounds::default());

        assert_eq!(result.final_shape_params["waist"], 1.0);
        assert_eq!(result.clamped_keys, vec![ParamKey::shape("waist")]);
        assert_eq!(result.envelope_violations.len(), 1);
        assert_eq!(result.envelope_violations[0].value, 1.5);
        assert_eq!(result.out_of_range_count, 1);
        assert!(result.missing_keys_added.is_empty());
    }

    #[test]
    fn test_missing_keys_filled_from_blend_then_midpoint() {
        let p = proposal(json!({"waist": 0.1, "chest": "wide"}), json!({"torso": null}));
        let mut blend = ArchetypeBlend::default();
        blend.shape_params.insert("chest".to_string(), 0.3);
        blend.limb_masses.insert("torso".to_string(), json!(31.0));
        blend.limb_masses.insert("left_arm".to_string(), Value::Null);

        let result = reconcile(&p, &envelope(), &blend, &HardBounds::default());

        let fills: BTreeMap<ParamKey, (f64, FillSource)> = result
            .missing_keys_added
            .iter()
            .map(|f| (f.key.clone(), (f.value, f.source)))
            .collect();
        assert_eq!(fills[&ParamKey::shape("chest")], (0.3, FillSource::Blend));
        assert_eq!(fills[&ParamKey::limb("torso")], (31.0, FillSource::Blend));
        assert_eq!(fills[&ParamKey::shape("hips")], (-0.5, FillSource::ArchetypeMidpoint));
        assert_eq!(fills[&ParamKey::limb("left_arm")], (3.5, FillSource::ArchetypeMidpoint));
        assert_eq!(result.rejected_ai_values, vec![ParamKey::shape("chest")]);
    }

    #[test]
    fn test_extra_keys_removed() {
        let p = proposal(json!({"waist": 0.0, "neck": 0.3}), json!({"tail": 1.0}));
        let result = reconcile(&p, &envelope(), &ArchetypeBlend::default(), &HardBounds::default());

        assert!(!result.final_shape_params.contains_key("neck"));
        assert_eq!(
            result.extra_keys_removed,
            vec![ParamKey::shape("neck"), ParamKey::limb("tail")]
        );
    }

    #[test]
    fn test_hard_bounds_narrow_clamp() {
        let mut hard = HardBounds::default();
        hard.insert(ParamKey::shape("waist"), -0.5, 0.5);
        let p = proposal(json!({"waist": 0.8}), json!({}));

        let result = reconcile(&p, &envelope(), &ArchetypeBlend::default(), &hard);

        assert_eq!(result.final_shape_params["waist"], 0.5);
        assert_eq!(result.db_violations.len(), 1);
        assert!(result.envelope_violations.is_empty());
        assert_eq!(result.clamped_keys, vec![ParamKey::shape("waist")]);
    }

    #[test]
    fn test_disjoint_hard_bounds_fall_back_to_envelope() {
        let mut hard = HardBounds::default();
        hard.insert(ParamKey::shape("waist"), 5.0, 6.0);
        let p = proposal(json!({"waist": 0.2}), json!({}));

        let result = reconcile(&p, &envelope(), &ArchetypeBlend::default(), &hard);

        assert_eq!(result.final_shape_params["waist"], 0.2);
        assert_eq!(result.db_violations.len(), 1);
        assert!(result.clamped_keys.is_empty());
    }

    #[test]
    fn test_containment_and_audit_completeness() {
        let env = envelope();
        let proposals = [
            proposal(json!({"chest": 0.1}), json!({})),
            proposal(
                json!({"waist": -9.0, "chest": 9.0, "hips": f64::MAX, "extra": 1}),
                json!({"left_arm": -1.0, "torso": 1e9}),
            ),
            proposal(json!({"waist": "x", "chest": [1], "hips": {}}), json!({"torso": true})),
        ];
        let mut blend = ArchetypeBlend::default();
        blend.shape_params.insert("waist".to_string(), 50.0);

        for p in &proposals {
            let result = reconcile(p, &env, &blend, &HardBounds::default());

            for key in env.keys() {
                let value = result.final_value(&key).unwrap();
                let r = env.get(&key).unwrap();
                assert!(r.min <= value && value <= r.max, "{} = {} escaped", key, value);
            }

            let clamped: BTreeSet<ParamKey> = result.clamped_keys.iter().cloned().collect();
            let missing: BTreeSet<ParamKey> =
                result.missing_keys_added.iter().map(|f| f.key.clone()).collect();
            assert!(clamped.is_disjoint(&missing));

            let unchanged: BTreeSet<ParamKey> = env
                .keys()
                .filter(|k| !clamped.contains(k) && !missing.contains(k))
                .filter(|k| {
                    p.params(k.kind).get(&k.name).and_then(Value::as_f64) == result.final_value(k)
                })
                .collect();
            let union: BTreeSet<ParamKey> =
                clamped.union(&missing).cloned().chain(unchanged).collect();
            let all: BTreeSet<ParamKey> = env.keys().collect();
            assert_eq!(union, all);

            let extra: BTreeSet<ParamKey> = result.extra_keys_removed.iter().cloned().collect();
            let expected_extra: BTreeSet<ParamKey> = ParamKind::ALL
                .into_iter()
                .flat_map(|kind| {
                    p.params(kind)
                        .keys()
                        .map(move |n| ParamKey::new(kind, n.clone()))
                })
                .filter(|k| !all.contains(k))
                .collect();
            assert_eq!(extra, expected_extra);
        }
    }

    #[test]
    fn test_empty_proposal_is_contract_error() {
        let result = check_proposal(&RefineProposal::default(), &envelope());
        assert!(matches!(result, Err(StageError::Contract(_))));

        // Only keys outside the envelope, or only unusable values
        let extras = proposal(json!({"neck": 0.3}), json!({"torso": "heavy"}));
        assert!(check_proposal(&extras, &envelope()).is_err());
    }

    #[test]
    fn test_single_finite_value_passes_check() {
        let p = proposal(json!({}), json!({"left_arm": 3.0}));
        assert!(check_proposal(&p, &envelope()).is_ok());
    }

    #[test]
    fn test_remote_audit_mismatch_detected() {
        let mut p = proposal(json!({"waist": 1.5}), json!({}));
        p.out_of_range_count = Some(0);
        let result = reconcile(&p, &envelope(), &ArchetypeBlend::default(), &HardBounds::default());
        assert!(remote_audit_disagrees(&result));

        p.out_of_range_count = Some(1);
        let result = reconcile(&p, &envelope(), &ArchetypeBlend::default(), &HardBounds::default());
        assert!(!remote_audit_disagrees(&result));
    }
}
