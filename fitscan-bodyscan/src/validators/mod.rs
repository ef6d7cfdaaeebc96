//! Stage output validation
//!
//! Remote stages are trusted for shape, never for values. Each validator here
//! checks one stage's output after decoding.
//!
//! # Validators
//! 1. **envelope** - 4-tuple bounds, clamping, archetype template audit
//! 2. **measurements** - estimator and classifier output sanity
//! 3. **matching** - matcher output: fatal contract checks and data-quality flags

pub mod envelope;
pub mod matching;
pub mod measurements;

pub use envelope::{DefectKind, EnvelopeDefect};
pub use matching::{assess_match, MatchAssessment};
pub use measurements::{check_estimate, check_semantic};
