//! Architecture and extension tagging for installer URLs
//!
//! The architecture table is an ordered list. Composite identifiers such as
//! `x86_x64` or `installer32` appear before the plain identifiers they
//! contain (`x86`, `32`), and the first entry that matches decides.

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Architecture reported when an extension matched but no table entry did
pub const NA_ARCHITECTURE: &str = "NA";

/// Extensions recognised by default, in match order
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "msixbundle",
    "appxbundle",
    "msix",
    "appx",
    "zip",
    "msi",
    "exe",
];

/// Default (pattern, canonical name) pairs. Patterns are regex fragments
/// matched against the lowercased URL.
const DEFAULT_ARCHITECTURES: &[(&str, &str)] = &[
    (r"x86[_.-]?x64", "x86_x64"),
    (r"x86[_.-]?only", "x86"),
    (r"installer[_.-]?32", "x86"),
    (r"installer[_.-]?64", "x64"),
    (r"shared[_.-]?32", "x86"),
    (r"shared[_.-]?64", "x64"),
    (r"aarch64|arm64|win[_.-]?arm64|windows[_.-]?arm64", "arm64"),
    (
        r"x86[_.-]64|amd64|win[_.-]?x64|windows[_.-]?x64|win64|x64|64[_.-]?bit",
        "x64",
    ),
    (r"armv[6-9]|arm", "arm"),
    (
        r"i386|i686|ia32|win[_.-]?ia32|win[_.-]?x86|windows[_.-]?x86|win32|x86|x32|32[_.-]?bit|386",
        "x86",
    ),
    (r"64", "x64"),
    (r"32", "x86"),
];

/// One configured row of the architecture table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchEntry {
    pub pattern: String,
    pub name: String,
}

impl ArchEntry {
    pub fn new(pattern: &str, name: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            name: name.to_string(),
        }
    }

    /// The built-in table, composite identifiers first
    pub fn defaults() -> Vec<Self> {
        DEFAULT_ARCHITECTURES
            .iter()
            .map(|(pattern, name)| Self::new(pattern, name))
            .collect()
    }
}

#[derive(Debug, Clone)]
struct ArchRule {
    regex: Regex,
    name: String,
}

/// Compiled architecture table
#[derive(Debug, Clone)]
pub struct ArchTable {
    rules: Vec<ArchRule>,
}

impl ArchTable {
    /// Compiles every entry into a boundary-aware regex, keeping table order
    pub fn compile(entries: &[ArchEntry]) -> Result<Self, ConfigError> {
        let rules = entries
            .iter()
            .map(|entry| {
                let bounded = format!("(?:^|[^a-z0-9])(?:{})(?:$|[^a-z0-9])", entry.pattern);
                Regex::new(&bounded)
                    .map(|regex| ArchRule {
                        regex,
                        name: entry.name.clone(),
                    })
                    .map_err(|source| ConfigError::ArchPattern {
                        pattern: entry.pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules })
    }

    /// Canonical architecture of an already lowercased URL, if any entry matches
    pub fn detect(&self, url_lower: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.regex.is_match(url_lower))
            .map(|rule| rule.name.as_str())
    }
}

/// Features derived from one installer URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlFeatures {
    pub architecture: String,
    pub extension: String,
}

impl UrlFeatures {
    /// `"{architecture}-{extension}"`
    pub fn pair(&self) -> String {
        format!("{}-{}", self.architecture, self.extension)
    }
}

/// First configured extension the URL ends with (case-insensitive)
pub fn detect_extension<'a>(url: &str, extensions: &'a [String]) -> Option<&'a str> {
    let lower = url.trim().to_lowercase();
    extensions
        .iter()
        .find(|ext| {
            lower
                .strip_suffix(ext.as_str())
                .is_some_and(|rest| rest.ends_with('.'))
        })
        .map(String::as_str)
}

/// Tags `url` with its extension and architecture.
///
/// Returns `None` when no allowed extension matches; such URLs take no part
/// in pairing at all. Blank or otherwise malformed URLs degrade the same way.
pub fn extract(url: &str, extensions: &[String], table: &ArchTable) -> Option<UrlFeatures> {
    let Some(extension) = detect_extension(url, extensions) else {
        debug!("No allowed extension in URL: {}", url);
        return None;
    };

    let lower = url.trim().to_lowercase();
    let architecture = table.detect(&lower).unwrap_or(NA_ARCHITECTURE);

    Some(UrlFeatures {
        architecture: architecture.to_string(),
        extension: extension.to_string(),
    })
}

/// Extension list plus compiled architecture table
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    extensions: Vec<String>,
    table: ArchTable,
}

impl FeatureExtractor {
    pub fn new(extensions: Vec<String>, table: ArchTable) -> Self {
        Self { extensions, table }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn extract(&self, url: &str) -> Option<UrlFeatures> {
        extract(url, &self.extensions, &self.table)
    }

    pub fn extension_of<'a>(&'a self, url: &str) -> Option<&'a str> {
        detect_extension(url, &self.extensions)
    }

    /// De-duplicated, sorted arch/ext pairs for a set of URLs
    pub fn pairs<'a, I>(&self, urls: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        urls.into_iter()
            .filter_map(|url| self.extract(url))
            .map(|features| features.pair())
            .collect()
    }
}
