use std::fmt;

use serde::Serialize;

use crate::fetch::PrState;

/// Reasons a package is dropped, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    UpstreamMissing,
    NoUpstreamUrls,
    OpenPullRequest,
    NoArchExtPairs,
    CurrentUrlsReleased,
    UrlsInHistory,
    SameVersion,
    EquivalentVersion,
    InstallerCountMismatch,
}

impl Rule {
    pub const ALL: [Rule; 9] = [
        Rule::UpstreamMissing,
        Rule::NoUpstreamUrls,
        Rule::OpenPullRequest,
        Rule::NoArchExtPairs,
        Rule::CurrentUrlsReleased,
        Rule::UrlsInHistory,
        Rule::SameVersion,
        Rule::EquivalentVersion,
        Rule::InstallerCountMismatch,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Rule::UpstreamMissing => "rule1",
            Rule::NoUpstreamUrls => "rule2",
            Rule::OpenPullRequest => "rule3",
            Rule::NoArchExtPairs => "rule4",
            Rule::CurrentUrlsReleased => "rule5",
            Rule::UrlsInHistory => "rule6",
            Rule::SameVersion => "rule7",
            Rule::EquivalentVersion => "rule8",
            Rule::InstallerCountMismatch => "rule9",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Rule::UpstreamMissing => "upstream release not found",
            Rule::NoUpstreamUrls => "upstream release has no install URLs",
            Rule::OpenPullRequest => "open pull request exists",
            Rule::NoArchExtPairs => "no architecture/extension pair",
            Rule::CurrentUrlsReleased => "current URLs already in upstream release",
            Rule::UrlsInHistory => "upstream URLs match manifest history",
            Rule::SameVersion => "same version",
            Rule::EquivalentVersion => "equivalent version after normalization",
            Rule::InstallerCountMismatch => "installer URL count mismatch",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.name())
    }
}

/// Failure classes that keep a package from being decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    InvalidResponse,
    CredentialExhausted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::CredentialExhausted => "credential_exhausted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Proceed,
    Rejected(Rule),
    Error(ErrorKind),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Proceed => "proceed",
            Outcome::Rejected(_) => "rejected",
            Outcome::Error(_) => "error",
        }
    }

    /// Rule code and name, or error kind; empty for `Proceed`
    pub fn reason(&self) -> String {
        match self {
            Outcome::Proceed => String::new(),
            Outcome::Rejected(rule) => rule.to_string(),
            Outcome::Error(kind) => kind.to_string(),
        }
    }
}

/// Decision for one package plus the facts it was based on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub package_id: String,
    pub outcome: Outcome,
    pub current_version: String,
    pub upstream_version: Option<String>,
    /// Asset URLs of the upstream release
    pub upstream_urls: Vec<String>,
    /// Pattern of the upstream version
    pub version_pattern: String,
    pub arch_ext_pairs: Vec<String>,
    pub exact_match_count: usize,
    pub normalized_match_count: usize,
    pub pr_state: PrState,
}

impl Verdict {
    /// Verdict for a package whose inputs could not be gathered
    pub fn error(package_id: &str, current_version: &str, kind: ErrorKind) -> Self {
        Self {
            package_id: package_id.to_string(),
            outcome: Outcome::Error(kind),
            current_version: current_version.to_string(),
            upstream_version: None,
            upstream_urls: Vec::new(),
            version_pattern: crate::version::UNKNOWN_PATTERN.to_string(),
            arch_ext_pairs: Vec::new(),
            exact_match_count: 0,
            normalized_match_count: 0,
            pr_state: PrState::NotSearched,
        }
    }

    pub fn is_proceed(&self) -> bool {
        self.outcome == Outcome::Proceed
    }
}
