// Archetype Blend - score-weighted averaging of archetype templates
//
// The blend is the refiner's starting point. Shape values are clamped into
// the envelope. Limb masses keep a JSON null for keys no archetype supplies a
// finite value for; the refine workflow filters those out before submission.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::types::{Archetype, Envelope, HardBounds, ParamKey, ParamKind, ParamRange};

/// Starting parameters for refinement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchetypeBlend {
    pub shape_params: BTreeMap<String, f64>,
    /// May contain non-finite entries (as `null`)
    pub limb_masses: Map<String, Value>,
}

impl ArchetypeBlend {
    /// Blend value for an envelope key, if finite
    pub fn value(&self, key: &ParamKey) -> Option<f64> {
        match key.kind {
            ParamKind::Shape => self.shape_params.get(&key.name).copied(),
            ParamKind::LimbMass => self
                .limb_masses
                .get(&key.name)
                .and_then(Value::as_f64)
                .filter(|v| v.is_finite()),
        }
    }
}

fn template(archetype: &Archetype, kind: ParamKind) -> &Map<String, Value> {
    match kind {
        ParamKind::Shape => &archetype.shape_params,
        ParamKind::LimbMass => &archetype.limb_masses,
    }
}

fn finite(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}

/// Per-archetype weights
///
/// Match scores when every archetype has a positive finite score, equal
/// weights otherwise.
pub fn archetype_weights(archetypes: &[Archetype]) -> Vec<f64> {
    let scores: Option<Vec<f64>> = archetypes
        .iter()
        .map(|a| a.score.filter(|s| s.is_finite() && *s > 0.0))
        .collect();
    match scores {
        Some(scores) => scores,
        None => vec![1.0; archetypes.len()],
    }
}

/// Weighted mean of finite template values for one key
fn weighted_mean(archetypes: &[Archetype], weights: &[f64], key: &ParamKey) -> Option<f64> {
    let mut sum = 0.0;
    let mut total_weight = 0.0;

    for (archetype, weight) in archetypes.iter().zip(weights) {
        if let Some(value) = template(archetype, key.kind).get(&key.name).and_then(finite) {
            sum += value * weight;
            total_weight += weight;
        }
    }

    if total_weight > 0.0 {
        Some(sum / total_weight)
    } else {
        None
    }
}

/// Blend the selected archetypes over the envelope's keys
///
/// Keys come from the envelope only. Entries with unusable bounds are not
/// clamped.
pub fn blend_archetypes(archetypes: &[Archetype], envelope: &Envelope) -> ArchetypeBlend {
    let weights = archetype_weights(archetypes);
    let mut blend = ArchetypeBlend::default();

    for key in envelope.keys() {
        let range = envelope.get(&key);
        let mean = weighted_mean(archetypes, &weights, &key).map(|v| match range {
            Some(r) if r.is_usable() => r.clamp(v),
            _ => v,
        });

        match key.kind {
            ParamKind::Shape => {
                if let Some(value) = mean {
                    blend.shape_params.insert(key.name, value);
                }
            }
            ParamKind::LimbMass => {
                let value = mean
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null);
                blend.limb_masses.insert(key.name, value);
            }
        }
    }

    blend
}

impl Envelope {
    /// Derive an envelope from archetype templates
    ///
    /// The archetype span is the min/max of finite template values. Outer
    /// bounds come from `hard_bounds` when defined for the key (and the span
    /// is clamped into them), otherwise they equal the span.
    pub fn derive(archetypes: &[Archetype], hard_bounds: &HardBounds) -> Envelope {
        let mut envelope = Envelope::default();

        for kind in ParamKind::ALL {
            let mut spans: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
            for archetype in archetypes {
                for (name, value) in template(archetype, kind) {
                    let Some(v) = finite(value) else {
                        continue;
                    };
                    spans
                        .entry(name.as_str())
                        .and_modify(|(lo, hi)| {
                            *lo = lo.min(v);
                            *hi = hi.max(v);
                        })
                        .or_insert((v, v));
                }
            }

            for (name, (lo, hi)) in spans {
                let key = ParamKey::new(kind, name);
                let range = match hard_bounds.get(&key).filter(|(min, max)| min <= max) {
                    Some((min, max)) => ParamRange {
                        min,
                        max,
                        archetype_min: lo.max(min).min(max),
                        archetype_max: hi.max(min).min(max),
                    },
                    None => ParamRange {
                        min: lo,
                        max: hi,
                        archetype_min: lo,
                        archetype_max: hi,
                    },
                };
                match kind {
                    ParamKind::Shape => envelope.shape_params.insert(key.name, range),
                    ParamKind::LimbMass => envelope.limb_masses.insert(key.name, range),
                };
            }
        }

        envelope
    }
}
