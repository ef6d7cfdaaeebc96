//! Envelope bounds and audit
//!
//! Each envelope entry is `{min, max, archetype_min, archetype_max}`. The outer
//! pair is the enforced range; the inner pair is the range the matched
//! archetypes actually span and must sit inside the outer pair.
//!
//! # Defect severity
//! - **Fatal**: non-finite or inverted outer bounds (nothing can be clamped into them)
//! - **Logged**: inner span outside the outer pair, inverted inner span,
//!   archetype template values outside the reported span

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::types::{Archetype, Envelope, ParamKey, ParamKind, ParamRange};

impl ParamRange {
    /// True when the outer bounds are finite and ordered
    pub fn is_usable(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn span_contains(&self, value: f64) -> bool {
        value >= self.archetype_min && value <= self.archetype_max
    }

    /// Force `value` to the nearest outer bound
    ///
    /// Only meaningful for usable ranges.
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }

    /// Midpoint of the archetype span, forced into the outer bounds
    pub fn archetype_midpoint(&self) -> f64 {
        let mid = if self.archetype_min.is_finite() && self.archetype_max.is_finite() {
            (self.archetype_min + self.archetype_max) / 2.0
        } else {
            (self.min + self.max) / 2.0
        };
        self.clamp(mid)
    }
}

/// Category of envelope inconsistency
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefectKind {
    NonFiniteBound,
    InvertedBounds { min: f64, max: f64 },
    SpanOutsideBounds { min: f64, max: f64, archetype_min: f64, archetype_max: f64 },
    InvertedSpan { archetype_min: f64, archetype_max: f64 },
    TemplateOutsideSpan { archetype_id: String, value: f64 },
    /// Selected templates define the key but the envelope has no entry for it
    UnboundedTemplateKey { template_min: f64, template_max: f64 },
    /// Matcher-level inconsistency not tied to one parameter
    Matcher { detail: String },
}

/// One inconsistency found in matcher output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeDefect {
    pub key: Option<ParamKey>,
    #[serde(flatten)]
    pub kind: DefectKind,
}

impl EnvelopeDefect {
    pub fn new(key: ParamKey, kind: DefectKind) -> Self {
        Self {
            key: Some(key),
            kind,
        }
    }

    pub fn matcher(detail: impl Into<String>) -> Self {
        Self {
            key: None,
            kind: DefectKind::Matcher {
                detail: detail.into(),
            },
        }
    }

    /// Fatal defects make the envelope unusable for clamping
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            DefectKind::NonFiniteBound | DefectKind::InvertedBounds { .. }
        )
    }
}

impl fmt::Display for EnvelopeDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(key) = &self.key {
            write!(f, "{}: ", key)?;
        }
        match &self.kind {
            DefectKind::NonFiniteBound => write!(f, "non-finite bound"),
            DefectKind::InvertedBounds { min, max } => {
                write!(f, "min {} > max {}", min, max)
            }
            DefectKind::SpanOutsideBounds {
                min,
                max,
                archetype_min,
                archetype_max,
            } => write!(
                f,
                "archetype span [{}, {}] exceeds bounds [{}, {}]",
                archetype_min, archetype_max, min, max
            ),
            DefectKind::InvertedSpan {
                archetype_min,
                archetype_max,
            } => write!(
                f,
                "archetype_min {} > archetype_max {}",
                archetype_min, archetype_max
            ),
            DefectKind::TemplateOutsideSpan {
                archetype_id,
                value,
            } => write!(
                f,
                "archetype {} template value {} outside reported span",
                archetype_id, value
            ),
            DefectKind::UnboundedTemplateKey {
                template_min,
                template_max,
            } => write!(
                f,
                "templates span [{}, {}] but the envelope has no bounds",
                template_min, template_max
            ),
            DefectKind::Matcher { detail } => f.write_str(detail),
        }
    }
}

/// Check one entry's 4-tuple
pub fn check_range(key: &ParamKey, range: &ParamRange) -> Vec<EnvelopeDefect> {
    let values = [range.min, range.max, range.archetype_min, range.archetype_max];
    if values.iter().any(|v| !v.is_finite()) {
        return vec![EnvelopeDefect::new(key.clone(), DefectKind::NonFiniteBound)];
    }

    let mut defects = Vec::new();
    if range.min > range.max {
        defects.push(EnvelopeDefect::new(
            key.clone(),
            DefectKind::InvertedBounds {
                min: range.min,
                max: range.max,
            },
        ));
    }
    if range.archetype_min > range.archetype_max {
        defects.push(EnvelopeDefect::new(
            key.clone(),
            DefectKind::InvertedSpan {
                archetype_min: range.archetype_min,
                archetype_max: range.archetype_max,
            },
        ));
    }
    if range.archetype_min < range.min || range.archetype_max > range.max {
        defects.push(EnvelopeDefect::new(
            key.clone(),
            DefectKind::SpanOutsideBounds {
                min: range.min,
                max: range.max,
                archetype_min: range.archetype_min,
                archetype_max: range.archetype_max,
            },
        ));
    }
    defects
}

fn template(archetype: &Archetype, kind: ParamKind) -> &serde_json::Map<String, Value> {
    match kind {
        ParamKind::Shape => &archetype.shape_params,
        ParamKind::LimbMass => &archetype.limb_masses,
    }
}

impl Envelope {
    /// Report every invariant violation in this envelope
    ///
    /// Covers the 4-tuple of each entry and every finite template value of the
    /// given archetypes that lies outside the entry's archetype span.
    /// Non-numeric template values are ignored here; the blend skips them.
    pub fn audit(&self, archetypes: &[Archetype]) -> Vec<EnvelopeDefect> {
        let mut defects = Vec::new();

        for key in self.keys() {
            let Some(range) = self.get(&key) else {
                continue;
            };
            let entry_defects = check_range(&key, range);
            let unusable = entry_defects.iter().any(EnvelopeDefect::is_fatal);
            defects.extend(entry_defects);
            if unusable {
                continue;
            }

            for archetype in archetypes {
                let Some(value) = template(archetype, key.kind)
                    .get(&key.name)
                    .and_then(Value::as_f64)
                    .filter(|v| v.is_finite())
                else {
                    continue;
                };
                if !range.span_contains(value) {
                    defects.push(EnvelopeDefect::new(
                        key.clone(),
                        DefectKind::TemplateOutsideSpan {
                            archetype_id: archetype.id.clone(),
                            value,
                        },
                    ));
                }
            }
        }

        defects
    }
}
