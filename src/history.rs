//! Historical installer URLs of catalog packages

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::error::HistoryError;

/// Every installer URL a package has shipped, keyed by version label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestHistory {
    versions: IndexMap<String, Vec<String>>,
}

impl ManifestHistory {
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }

    pub fn urls_for(&self, version: &str) -> Option<&[String]> {
        self.versions.get(version).map(Vec::as_slice)
    }

    /// Union of URLs across all versions, de-duplicated
    pub fn all_urls(&self) -> BTreeSet<&str> {
        self.versions
            .values()
            .flatten()
            .map(String::as_str)
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for ManifestHistory
where
    K: Into<String>,
    V: IntoIterator,
    V::Item: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            versions: iter
                .into_iter()
                .map(|(version, urls)| (version.into(), urls.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }
}

/// Source of historical URLs for a package
#[cfg_attr(test, automock)]
pub trait HistoryProvider: Send + Sync {
    /// Returns the full history. An unknown package yields an empty history
    /// or [`HistoryError::Unavailable`]; callers treat both as "no match".
    fn history(&self, package_id: &str) -> Result<ManifestHistory, HistoryError>;
}

/// History loaded up front, e.g. from the catalog input file
#[derive(Debug, Clone, Default)]
pub struct CatalogHistory {
    packages: HashMap<String, ManifestHistory>,
}

impl CatalogHistory {
    pub fn new(packages: HashMap<String, ManifestHistory>) -> Self {
        Self { packages }
    }

    pub fn insert(&mut self, package_id: &str, history: ManifestHistory) {
        self.packages.insert(package_id.to_string(), history);
    }
}

impl FromIterator<(String, ManifestHistory)> for CatalogHistory {
    fn from_iter<T: IntoIterator<Item = (String, ManifestHistory)>>(iter: T) -> Self {
        Self {
            packages: iter.into_iter().collect(),
        }
    }
}

impl HistoryProvider for CatalogHistory {
    fn history(&self, package_id: &str) -> Result<ManifestHistory, HistoryError> {
        self.packages
            .get(package_id)
            .cloned()
            .ok_or_else(|| HistoryError::Unavailable(package_id.to_string()))
    }
}
