use std::collections::BTreeSet;

use tracing::debug;

use crate::config::CatalogEntry;
use crate::decision::verdict::{Outcome, Rule, Verdict};
use crate::fetch::{PrState, ReleaseSnapshot};
use crate::history::ManifestHistory;
use crate::url::{FeatureExtractor, MatchEngine, MatchResult};
use crate::version::{UNKNOWN_PATTERN, classify, versions_match};

/// Everything the rules look at for one package
#[derive(Debug, Clone)]
pub struct DecisionRecord {
    pub package_id: String,
    /// `None` when the upstream lookup found nothing
    pub upstream: Option<ReleaseSnapshot>,
    pub current_version: String,
    pub current_urls: Vec<String>,
    pub installer_url_count: usize,
    pub arch_ext_pairs: BTreeSet<String>,
    /// Upstream URLs compared against the union of all history versions
    pub match_result: MatchResult,
    pub pr_state: PrState,
}

/// Rules 1 and 2 only need the upstream lookup, so the scheduler can run
/// them before spending a credential on the PR search.
pub fn early_rejection(upstream: Option<&ReleaseSnapshot>) -> Option<Rule> {
    check_upstream(upstream).err()
}

fn check_upstream(upstream: Option<&ReleaseSnapshot>) -> Result<&ReleaseSnapshot, Rule> {
    let upstream = upstream.ok_or(Rule::UpstreamMissing)?;
    if upstream.urls.is_empty() {
        return Err(Rule::NoUpstreamUrls);
    }
    Ok(upstream)
}

pub struct DecisionPipeline {
    extractor: FeatureExtractor,
    engine: MatchEngine,
}

impl DecisionPipeline {
    pub fn new(extractor: FeatureExtractor, engine: MatchEngine) -> Self {
        Self { extractor, engine }
    }

    /// Derives the record fields that depend on URL analysis
    pub fn assemble(
        &self,
        entry: &CatalogEntry,
        upstream: Option<ReleaseSnapshot>,
        history: &ManifestHistory,
        pr_state: PrState,
    ) -> DecisionRecord {
        let arch_ext_pairs = self
            .extractor
            .pairs(entry.current_urls.iter().map(String::as_str));

        let match_result = match &upstream {
            Some(snapshot) => self.engine.compare(
                snapshot.urls.iter().map(String::as_str),
                history.all_urls(),
            ),
            None => MatchResult::default(),
        };

        DecisionRecord {
            package_id: entry.package_id.clone(),
            upstream,
            current_version: entry.current_version.clone(),
            current_urls: entry.current_urls.clone(),
            installer_url_count: entry.recorded_installer_count(),
            arch_ext_pairs,
            match_result,
            pr_state,
        }
    }

    pub fn decide(&self, record: &DecisionRecord) -> Verdict {
        let outcome = match self.first_rejection(record) {
            Some(rule) => {
                debug!("{} rejected by {}", record.package_id, rule);
                Outcome::Rejected(rule)
            }
            None => Outcome::Proceed,
        };

        let upstream_version = record.upstream.as_ref().map(|u| u.version.clone());
        let upstream_urls = record
            .upstream
            .as_ref()
            .map(|u| u.urls.clone())
            .unwrap_or_default();
        let version_pattern = upstream_version
            .as_deref()
            .map(classify)
            .unwrap_or_else(|| UNKNOWN_PATTERN.to_string());

        Verdict {
            package_id: record.package_id.clone(),
            outcome,
            current_version: record.current_version.clone(),
            upstream_version,
            upstream_urls,
            version_pattern,
            arch_ext_pairs: record.arch_ext_pairs.iter().cloned().collect(),
            exact_match_count: record.match_result.exact_matches.len(),
            normalized_match_count: record.match_result.normalized_matches.len(),
            pr_state: record.pr_state,
        }
    }

    fn first_rejection(&self, record: &DecisionRecord) -> Option<Rule> {
        let upstream = match check_upstream(record.upstream.as_ref()) {
            Ok(upstream) => upstream,
            Err(rule) => return Some(rule),
        };

        if record.pr_state == PrState::Open {
            return Some(Rule::OpenPullRequest);
        }

        if record.arch_ext_pairs.is_empty() {
            return Some(Rule::NoArchExtPairs);
        }

        if record
            .current_urls
            .iter()
            .any(|url| upstream.urls.contains(url))
        {
            return Some(Rule::CurrentUrlsReleased);
        }

        if record.match_result.has_any_match() {
            return Some(Rule::UrlsInHistory);
        }

        if record.current_version == upstream.version {
            return Some(Rule::SameVersion);
        }

        if versions_match(&record.current_version, &upstream.version) {
            return Some(Rule::EquivalentVersion);
        }

        let installable = self.installable_count(upstream, &record.arch_ext_pairs);
        if installable != record.installer_url_count {
            debug!(
                "{}: {} installable upstream URLs, {} recorded",
                record.package_id, installable, record.installer_url_count
            );
            return Some(Rule::InstallerCountMismatch);
        }

        None
    }

    /// Upstream URLs whose extension the catalog entry already ships
    fn installable_count(&self, upstream: &ReleaseSnapshot, pairs: &BTreeSet<String>) -> usize {
        let catalog_extensions: BTreeSet<&str> = pairs
            .iter()
            .filter_map(|pair| pair.rsplit_once('-').map(|(_, ext)| ext))
            .collect();

        upstream
            .urls
            .iter()
            .filter_map(|url| self.extractor.extension_of(url))
            .filter(|ext| catalog_extensions.contains(ext))
            .count()
    }
}
