// Fusion Module - archetype blending and semantic index derivation
//
// Inputs to the match and refine stages that are computed locally rather than
// returned by a remote stage.

pub mod blend;
pub mod indices;

pub use blend::{blend_archetypes, ArchetypeBlend};
pub use indices::{SemanticIndexTable, UnknownTag};
