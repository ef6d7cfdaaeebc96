//! Data contracts for the body-scan pipeline
//!
//! Every type here crosses a stage boundary: it is either sent to one of the
//! remote stages, received from one, or persisted as part of the commit
//! aggregate. Field names follow the wire format of the remote functions.

use fitscan_common::ClientScanId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Scan Input
// ============================================================================

/// Declared gender, as entered by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
        }
    }
}

/// Camera view of a scan photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoView {
    Front,
    Side,
}

/// Capture-quality report produced on device when the photo was taken
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureReport {
    #[serde(default)]
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blur_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose_score: Option<f64>,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Uploaded scan photo (reference + capture metadata)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanPhoto {
    pub view: PhotoView,
    /// Storage URL or object path of the uploaded image
    pub url: String,
    #[serde(default)]
    pub report: CaptureReport,
}

/// User-declared biometrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeclaredBiometrics {
    pub height_cm: f64,
    pub weight_kg: f64,
    pub gender: Gender,
}

impl DeclaredBiometrics {
    /// BMI from declared height and weight
    pub fn declared_bmi(&self) -> f64 {
        let height_m = self.height_cm / 100.0;
        self.weight_kg / (height_m * height_m)
    }
}

/// One scan attempt as submitted by the orchestrating caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub client_scan_id: ClientScanId,
    pub user_id: String,
    pub photos: Vec<ScanPhoto>,
    pub biometrics: DeclaredBiometrics,
}

impl ScanRequest {
    /// Check the request before any stage is called
    pub fn validate(&self) -> Result<(), String> {
        if self.client_scan_id.is_blank() {
            return Err("client_scan_id must not be empty".to_string());
        }
        if self.user_id.trim().is_empty() {
            return Err("user_id must not be empty".to_string());
        }
        if self.photos.is_empty() || self.photos.len() > 2 {
            return Err(format!(
                "expected 1 or 2 photos, got {}",
                self.photos.len()
            ));
        }
        if self.photos.len() == 2 && self.photos[0].view == self.photos[1].view {
            return Err("photos must use distinct views (front/side)".to_string());
        }
        if let Some(photo) = self.photos.iter().find(|p| p.url.trim().is_empty()) {
            return Err(format!("{:?} photo has an empty url", photo.view));
        }

        let b = &self.biometrics;
        if !(b.height_cm.is_finite() && (50.0..=272.0).contains(&b.height_cm)) {
            return Err(format!("height_cm out of range: {}", b.height_cm));
        }
        if !(b.weight_kg.is_finite() && (20.0..=400.0).contains(&b.weight_kg)) {
            return Err(format!("weight_kg out of range: {}", b.weight_kg));
        }
        Ok(())
    }
}

// ============================================================================
// Stage 1: Estimate
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct EstimateRequest {
    #[serde(rename = "clientScanId")]
    pub client_scan_id: ClientScanId,
    pub photos: Vec<ScanPhoto>,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub gender: Gender,
}

/// Raw body measurements (`extracted_data` on the wire)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMeasurements {
    /// Circumferences and lengths in cm, keyed by measurement name
    pub raw_measurements: BTreeMap<String, f64>,
    pub estimated_bmi: f64,
    /// Estimator confidence in [0, 1]
    pub processing_confidence: f64,
}

/// Skin tone descriptor; opaque to the pipeline, persisted verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkinTone(pub Value);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateResponse {
    pub extracted_data: RawMeasurements,
    pub skin_tone: SkinTone,
}

// ============================================================================
// Stage 2: Semantic classification
// ============================================================================

/// Categorical body descriptors; values are opaque classifier tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticProfile {
    pub obesity: String,
    pub muscularity: String,
    pub morphotype: String,
    pub level: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SemanticRequest {
    #[serde(rename = "clientScanId")]
    pub client_scan_id: ClientScanId,
    pub user_id: String,
    pub photos: Vec<ScanPhoto>,
    pub extracted_data: RawMeasurements,
    pub gender: Gender,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticResponse {
    pub semantic_profile: SemanticProfile,
    pub semantic_confidence: f64,
    #[serde(default)]
    pub adjustments_made: Vec<String>,
}

/// Scalars summarizing a semantic profile for nearest-neighbour search
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticIndices {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub morph_index: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muscle_index: Option<f64>,
}

// ============================================================================
// Stage 3: Archetype matching
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct MatchingConfig {
    pub gender: Gender,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchRequest {
    pub user_id: String,
    pub extracted_data: RawMeasurements,
    pub semantic_profile: SemanticProfile,
    #[serde(flatten)]
    pub indices: SemanticIndices,
    pub matching_config: MatchingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BmiRange {
    pub min: f64,
    pub max: f64,
}

impl BmiRange {
    pub fn contains(&self, bmi: f64) -> bool {
        bmi >= self.min && bmi <= self.max
    }
}

/// Reference archetype selected by the matcher
///
/// Templates are kept as raw JSON: archetype data is not owned here and may
/// carry non-numeric entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archetype {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub bmi_range: BmiRange,
    pub obesity: String,
    /// Match score, higher is closer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub shape_params: Map<String, Value>,
    #[serde(default)]
    pub limb_masses: Map<String, Value>,
}

/// Permissible range for one parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    pub archetype_min: f64,
    pub archetype_max: f64,
}

/// Per-parameter bounds derived from the matched archetypes (`k5_envelope`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub shape_params: BTreeMap<String, ParamRange>,
    #[serde(default)]
    pub limb_masses: BTreeMap<String, ParamRange>,
}

impl Envelope {
    pub fn params(&self, kind: ParamKind) -> &BTreeMap<String, ParamRange> {
        match kind {
            ParamKind::Shape => &self.shape_params,
            ParamKind::LimbMass => &self.limb_masses,
        }
    }

    pub fn get(&self, key: &ParamKey) -> Option<&ParamRange> {
        self.params(key.kind).get(&key.name)
    }

    pub fn len(&self) -> usize {
        self.shape_params.len() + self.limb_masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All parameter keys, shape parameters first
    pub fn keys(&self) -> impl Iterator<Item = ParamKey> + '_ {
        ParamKind::ALL.into_iter().flat_map(move |kind| {
            self.params(kind)
                .keys()
                .map(move |name| ParamKey::new(kind, name.clone()))
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteringStats {
    #[serde(default)]
    pub total_before_filtering: u32,
    #[serde(default)]
    pub after_bmi_filter: u32,
    #[serde(default)]
    pub bmi_relaxation_applied: bool,
    /// Candidates left after relaxation (equals `after_bmi_filter` when not relaxed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_relaxation: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugPhaseA {
    #[serde(default)]
    pub filtering_stats: FilteringStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingMetadata {
    /// Matcher used the static mapping table instead of the live dataset
    #[serde(default)]
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResponse {
    pub selected_archetypes: Vec<Archetype>,
    pub strategy_used: String,
    pub semantic_coherence_score: f64,
    pub k5_envelope: Envelope,
    #[serde(default)]
    pub mapping_metadata: MappingMetadata,
    #[serde(default)]
    pub debug_phase_a: DebugPhaseA,
}

// ============================================================================
// Stage 4: Refinement
// ============================================================================

/// Parameter family inside the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Shape,
    LimbMass,
}

impl ParamKind {
    pub const ALL: [ParamKind; 2] = [ParamKind::Shape, ParamKind::LimbMass];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shape => "shape",
            Self::LimbMass => "limb_mass",
        }
    }
}

/// Fully qualified parameter name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamKey {
    pub kind: ParamKind,
    pub name: String,
}

impl ParamKey {
    pub fn new(kind: ParamKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn shape(name: impl Into<String>) -> Self {
        Self::new(ParamKind::Shape, name)
    }

    pub fn limb(name: impl Into<String>) -> Self {
        Self::new(ParamKind::LimbMass, name)
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.name)
    }
}

/// Measurements forwarded to the refiner as context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMeasurements {
    pub height_cm: f64,
    pub weight_kg: f64,
    pub estimated_bmi: f64,
    pub raw_measurements: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefineRequest {
    pub scan_id: ClientScanId,
    #[serde(rename = "resolvedGender")]
    pub resolved_gender: Gender,
    pub photos: Vec<ScanPhoto>,
    pub blend_shape_params: BTreeMap<String, f64>,
    /// Finite values only
    pub blend_limb_masses: BTreeMap<String, f64>,
    pub mapping_version: String,
    pub k5_envelope: Envelope,
    pub vision_classification: SemanticProfile,
    pub user_measurements: UserMeasurements,
}

/// Raw refiner output, before local clamping
///
/// Parameter maps stay as JSON so that non-numeric AI output can be detected
/// instead of failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefineProposal {
    #[serde(default)]
    pub final_shape_params: Map<String, Value>,
    #[serde(default)]
    pub final_limb_masses: Map<String, Value>,
    #[serde(default)]
    pub clamped_keys: Vec<String>,
    #[serde(default)]
    pub envelope_violations: Vec<Value>,
    #[serde(default)]
    pub db_violations: Vec<Value>,
    #[serde(default)]
    pub missing_keys_added: Vec<String>,
    #[serde(default)]
    pub extra_keys_removed: Vec<String>,
    #[serde(default)]
    pub out_of_range_count: Option<u32>,
    #[serde(default)]
    pub ai_confidence: Option<f64>,
}

impl RefineProposal {
    pub fn params(&self, kind: ParamKind) -> &Map<String, Value> {
        match kind {
            ParamKind::Shape => &self.final_shape_params,
            ParamKind::LimbMass => &self.final_limb_masses,
        }
    }
}

/// A proposed value that fell outside a bound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundViolation {
    pub key: ParamKey,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

/// Where a missing parameter's value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillSource {
    /// The archetype blend sent to the refiner
    Blend,
    /// Midpoint of the envelope's archetype span
    ArchetypeMidpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingKeyFill {
    pub key: ParamKey,
    pub value: f64,
    pub source: FillSource,
}

/// Refiner audit counts as reported by the remote service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteAudit {
    pub clamped: usize,
    pub envelope_violations: usize,
    pub db_violations: usize,
    pub missing_keys_added: usize,
    pub extra_keys_removed: usize,
    pub out_of_range_count: Option<u32>,
}

/// Validated refinement output
///
/// Every value in `final_shape_params` / `final_limb_masses` lies within its
/// envelope `[min, max]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefinementResult {
    pub final_shape_params: BTreeMap<String, f64>,
    pub final_limb_masses: BTreeMap<String, f64>,
    pub clamped_keys: Vec<ParamKey>,
    pub envelope_violations: Vec<BoundViolation>,
    pub db_violations: Vec<BoundViolation>,
    pub missing_keys_added: Vec<MissingKeyFill>,
    pub extra_keys_removed: Vec<ParamKey>,
    /// Envelope keys whose AI value was present but not a finite number
    pub rejected_ai_values: Vec<ParamKey>,
    /// Blend limb-mass keys dropped before submission (non-finite)
    pub dropped_blend_limb_masses: Vec<String>,
    pub out_of_range_count: u32,
    pub ai_confidence: Option<f64>,
    pub remote_audit: RemoteAudit,
}

impl RefinementResult {
    pub fn final_params(&self, kind: ParamKind) -> &BTreeMap<String, f64> {
        match kind {
            ParamKind::Shape => &self.final_shape_params,
            ParamKind::LimbMass => &self.final_limb_masses,
        }
    }

    pub fn final_value(&self, key: &ParamKey) -> Option<f64> {
        self.final_params(key.kind).get(&key.name).copied()
    }
}

/// Hard bounds defined in the database, independent of any archetype
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardBounds {
    pub shape_params: BTreeMap<String, (f64, f64)>,
    pub limb_masses: BTreeMap<String, (f64, f64)>,
}

impl HardBounds {
    pub fn get(&self, key: &ParamKey) -> Option<(f64, f64)> {
        match key.kind {
            ParamKind::Shape => self.shape_params.get(&key.name).copied(),
            ParamKind::LimbMass => self.limb_masses.get(&key.name).copied(),
        }
    }

    pub fn insert(&mut self, key: ParamKey, min: f64, max: f64) {
        match key.kind {
            ParamKind::Shape => self.shape_params.insert(key.name, (min, max)),
            ParamKind::LimbMass => self.limb_masses.insert(key.name, (min, max)),
        };
    }

    pub fn len(&self) -> usize {
        self.shape_params.len() + self.limb_masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Stage 5: Commit
// ============================================================================

/// Photo metadata persisted with the scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoMetadata {
    pub view: PhotoView,
    pub url: String,
    pub report: CaptureReport,
}

impl From<&ScanPhoto> for PhotoMetadata {
    fn from(photo: &ScanPhoto) -> Self {
        Self {
            view: photo.view,
            url: photo.url.clone(),
            report: photo.report.clone(),
        }
    }
}

/// Complete aggregate persisted atomically by the commit stage
///
/// Assembled once per scan attempt and serialized once; retries resend the
/// same bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitPayload {
    #[serde(rename = "clientScanId")]
    pub client_scan_id: ClientScanId,
    pub user_id: String,
    pub resolved_gender: Gender,
    pub skin_tone: SkinTone,
    pub mapping_version: String,
    pub photos: Vec<PhotoMetadata>,
    pub biometrics: DeclaredBiometrics,
    pub extracted_data: RawMeasurements,
    pub semantic: SemanticResponse,
    pub semantic_indices: SemanticIndices,
    pub matching: MatchResponse,
    pub refinement: RefinementResult,
}

/// Data field of a commit response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitAck {
    #[serde(default)]
    pub scan_id: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub processing_complete: Option<bool>,
}

/// Error field of a remote response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// Response object of one commit call
///
/// `data` and `error` are independent: both, either or neither may be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitReply {
    #[serde(default)]
    pub data: Option<CommitAck>,
    #[serde(default)]
    pub error: Option<RemoteError>,
}
