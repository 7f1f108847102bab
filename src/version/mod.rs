//! Version string handling
//!
//! Versions are compared by shape and by loose string equality only; no
//! semantic-versioning ordering is attempted.
//!
//! - [`pattern`]: canonical shape of a version string (`1NumDot1Num`, ...)
//! - [`normalize`]: case and prefix-insensitive equality

pub mod normalize;
pub mod pattern;

pub use normalize::{normalize_version, versions_match};
pub use pattern::{UNKNOWN_PATTERN, classify};
