// Semantic Indices - tag → scalar lookup for nearest-neighbour search
//
// morph_index places the morphotype on an ectomorph (0.0) → endomorph (1.0)
// axis; muscle_index places muscularity on very low (0.0) → very high (1.0).
// Unknown tags produce no index rather than a guessed one.

use fitscan_common::config::SemanticIndexConfig;
use std::collections::BTreeMap;

use crate::types::{SemanticIndices, SemanticProfile};

const MORPHOTYPE_DEFAULTS: &[(&str, f64)] = &[
    ("ectomorph", 0.0),
    ("ecto", 0.0),
    ("ecto_mesomorph", 0.25),
    ("mesomorph", 0.5),
    ("meso", 0.5),
    ("meso_endomorph", 0.75),
    ("endomorph", 1.0),
    ("endo", 1.0),
];

const MUSCULARITY_DEFAULTS: &[(&str, f64)] = &[
    ("very_low", 0.0),
    ("low", 0.25),
    ("normal", 0.5),
    ("moderate", 0.5),
    ("high", 0.75),
    ("very_high", 1.0),
];

/// A profile tag with no index mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTag {
    pub field: &'static str,
    pub tag: String,
}

/// Lowercase, with `-` and spaces folded to `_`
fn normalize(tag: &str) -> String {
    tag.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' || c == ' ' { '_' } else { c })
        .collect()
}

fn table(defaults: &[(&str, f64)], overrides: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let mut map: BTreeMap<String, f64> = defaults
        .iter()
        .map(|(tag, value)| (tag.to_string(), *value))
        .collect();
    for (tag, value) in overrides {
        if value.is_finite() {
            map.insert(normalize(tag), *value);
        } else {
            tracing::warn!(tag = %tag, "Ignoring non-finite semantic index override");
        }
    }
    map
}

/// Tag → index lookup tables
#[derive(Debug, Clone)]
pub struct SemanticIndexTable {
    morphotype: BTreeMap<String, f64>,
    muscularity: BTreeMap<String, f64>,
}

impl Default for SemanticIndexTable {
    fn default() -> Self {
        Self::from_config(&SemanticIndexConfig::default())
    }
}

impl SemanticIndexTable {
    /// Built-in tables with TOML overrides merged on top
    pub fn from_config(config: &SemanticIndexConfig) -> Self {
        Self {
            morphotype: table(MORPHOTYPE_DEFAULTS, &config.morphotype),
            muscularity: table(MUSCULARITY_DEFAULTS, &config.muscularity),
        }
    }

    /// Derive indices for a profile; unknown tags are returned alongside
    pub fn derive(&self, profile: &SemanticProfile) -> (SemanticIndices, Vec<UnknownTag>) {
        let mut unknown = Vec::new();

        let morph_index = self.morphotype.get(&normalize(&profile.morphotype)).copied();
        if morph_index.is_none() {
            unknown.push(UnknownTag {
                field: "morphotype",
                tag: profile.morphotype.clone(),
            });
        }

        let muscle_index = self
            .muscularity
            .get(&normalize(&profile.muscularity))
            .copied();
        if muscle_index.is_none() {
            unknown.push(UnknownTag {
                field: "muscularity",
                tag: profile.muscularity.clone(),
            });
        }

        (
            SemanticIndices {
                morph_index,
                muscle_index,
            },
            unknown,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(morphotype: &str, muscularity: &str) -> SemanticProfile {
        SemanticProfile {
            obesity: "normal".to_string(),
            muscularity: muscularity.to_string(),
            morphotype: morphotype.to_string(),
            level: "average".to_string(),
        }
    }

    #[test]
    fn test_known_tags_map_to_indices() {
        let table = SemanticIndexTable::default();
        let (indices, unknown) = table.derive(&profile("Meso-Endomorph", "High"));
        assert_eq!(indices.morph_index, Some(0.75));
        assert_eq!(indices.muscle_index, Some(0.75));
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_unknown_tag_yields_no_index() {
        let table = SemanticIndexTable::default();
        let (indices, unknown) = table.derive(&profile("pear", "very low"));
        assert_eq!(indices.morph_index, None);
        assert_eq!(indices.muscle_index, Some(0.0));
        assert_eq!(
            unknown,
            vec![UnknownTag {
                field: "morphotype",
                tag: "pear".to_string()
            }]
        );
    }

    #[test]
    fn test_overrides_extend_table() {
        let mut config = SemanticIndexConfig::default();
        config.morphotype.insert("Pear".to_string(), 0.8);
        config.muscularity.insert("high".to_string(), 0.9);
        let table = SemanticIndexTable::from_config(&config);

        let (indices, unknown) = table.derive(&profile("pear", "high"));

        assert_eq!(indices.morph_index, Some(0.8));
        assert_eq!(indices.muscle_index, Some(0.9));
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_unknown_indices_omitted_from_wire() {
        let indices = SemanticIndices {
            morph_index: None,
            muscle_index: Some(0.5),
        };
        let value = serde_json::to_value(indices).unwrap();
        assert!(value.get("morph_index").is_none());
        assert_eq!(value["muscle_index"], 0.5);
    }
}
