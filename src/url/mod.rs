//! Installer URL analysis
//!
//! - [`features`]: architecture/extension tagging against ordered tables
//! - [`normalize`]: version-insensitive URL form
//! - [`matcher`]: exact and normalized comparison against a URL corpus

pub mod features;
pub mod matcher;
pub mod normalize;

pub use features::{ArchEntry, ArchTable, FeatureExtractor, NA_ARCHITECTURE, UrlFeatures};
pub use matcher::{MatchEngine, MatchResult, NormalizedMatch};
pub use normalize::UrlNormalizer;
