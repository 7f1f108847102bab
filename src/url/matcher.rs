//! Tiered comparison of candidate URLs against a reference corpus
//!
//! Tier 1 is exact string equality; tier 2 compares normalized forms. A
//! candidate that matched exactly never takes part in tier 2.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::url::normalize::UrlNormalizer;

/// A candidate that only matched a reference after normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedMatch {
    pub candidate: String,
    pub reference: String,
}

/// Outcome of [`MatchEngine::compare`]. Both lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub exact_matches: Vec<String>,
    pub normalized_matches: Vec<NormalizedMatch>,
}

impl MatchResult {
    pub fn has_any_match(&self) -> bool {
        !self.exact_matches.is_empty() || !self.normalized_matches.is_empty()
    }
}

#[derive(Default)]
pub struct MatchEngine {
    normalizer: UrlNormalizer,
}

impl MatchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares `candidates` with `reference`.
    ///
    /// Pass the union of URLs over every historical version as `reference`;
    /// a URL that was retired long ago still counts as represented.
    pub fn compare<'a, C, R>(&self, candidates: C, reference: R) -> MatchResult
    where
        C: IntoIterator<Item = &'a str>,
        R: IntoIterator<Item = &'a str>,
    {
        let candidates: BTreeSet<&str> = candidates.into_iter().collect();
        let reference: BTreeSet<&str> = reference.into_iter().collect();

        let (exact, remaining): (Vec<&str>, Vec<&str>) = candidates
            .into_iter()
            .partition(|candidate| reference.contains(candidate));

        if remaining.is_empty() || reference.is_empty() {
            return MatchResult {
                exact_matches: exact.into_iter().map(str::to_string).collect(),
                normalized_matches: Vec::new(),
            };
        }

        let normalized_reference: Vec<(&str, String)> = reference
            .iter()
            .map(|url| (*url, self.normalizer.normalize(url)))
            .collect();

        let normalized_matches = remaining
            .into_iter()
            .flat_map(|candidate| {
                let normalized = self.normalizer.normalize(candidate);
                normalized_reference
                    .iter()
                    .filter(move |(_, reference_norm)| *reference_norm == normalized)
                    .map(move |(reference_url, _)| NormalizedMatch {
                        candidate: candidate.to_string(),
                        reference: (*reference_url).to_string(),
                    })
            })
            .collect();

        MatchResult {
            exact_matches: exact.into_iter().map(str::to_string).collect(),
            normalized_matches,
        }
    }
}
