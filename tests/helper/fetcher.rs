//! In-memory release and pull request fakes

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use release_drift::batch::BatchRunner;
use release_drift::config::{CatalogEntry, ExhaustionPolicy, ScheduleSettings};
use release_drift::credential::{Credential, CredentialPool};
use release_drift::decision::DecisionPipeline;
use release_drift::error::FetchError;
use release_drift::fetch::{Fetched, PrSearcher, PrState, ReleaseFetcher, ReleaseSnapshot};
use release_drift::history::CatalogHistory;
use release_drift::url::features::DEFAULT_EXTENSIONS;
use release_drift::url::{ArchEntry, ArchTable, FeatureExtractor, MatchEngine};

/// Release fetcher serving fixed snapshots keyed by `owner/repo`
#[derive(Default)]
pub struct FakeReleases {
    releases: HashMap<String, ReleaseSnapshot>,
    rate_limited_tokens: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeReleases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_release(mut self, repository: &str, version: &str, urls: &[&str]) -> Self {
        self.releases.insert(
            repository.to_string(),
            ReleaseSnapshot {
                version: version.to_string(),
                urls: urls.iter().map(|u| u.to_string()).collect(),
                source: repository.to_string(),
            },
        );
        self
    }

    /// Every call made with `token` fails with a rate-limit error
    pub fn rate_limiting(mut self, token: &str) -> Self {
        self.rate_limited_tokens.insert(token.to_string());
        self
    }

    /// Tokens used, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReleaseFetcher for FakeReleases {
    async fn latest_release(
        &self,
        owner: &str,
        repo: &str,
        credential: &Credential,
    ) -> Result<Fetched<Option<ReleaseSnapshot>>, FetchError> {
        self.calls.lock().unwrap().push(credential.token().to_string());

        if self.rate_limited_tokens.contains(credential.token()) {
            return Err(FetchError::RateLimited {
                retry_after_secs: Some(600),
            });
        }

        Ok(Fetched {
            value: self.releases.get(&format!("{}/{}", owner, repo)).cloned(),
            quota: None,
        })
    }
}

/// PR searcher answering from a fixed table; unknown packages have no PR
#[derive(Default)]
pub struct FakePrSearch {
    states: HashMap<String, PrState>,
}

impl FakePrSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, package_id: &str, state: PrState) -> Self {
        self.states.insert(package_id.to_string(), state);
        self
    }
}

#[async_trait]
impl PrSearcher for FakePrSearch {
    async fn search_pr(
        &self,
        package_id: &str,
        _credential: &Credential,
    ) -> Result<Fetched<PrState>, FetchError> {
        Ok(Fetched {
            value: self
                .states
                .get(package_id)
                .copied()
                .unwrap_or(PrState::NotFound),
            quota: None,
        })
    }
}

pub fn create_pool(tokens: &[&str]) -> Arc<CredentialPool> {
    Arc::new(
        CredentialPool::new(
            tokens.iter().map(|t| t.to_string()).collect(),
            Duration::from_secs(60),
        )
        .unwrap(),
    )
}

pub fn default_pipeline() -> DecisionPipeline {
    let extractor = FeatureExtractor::new(
        DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        ArchTable::compile(&ArchEntry::defaults()).unwrap(),
    );
    DecisionPipeline::new(extractor, MatchEngine::new())
}

pub fn fast_settings(policy: ExhaustionPolicy) -> ScheduleSettings {
    ScheduleSettings {
        concurrency: 4,
        batch_size: 2,
        batch_delay: Duration::from_millis(1),
        max_wait: Duration::from_millis(500),
        exhaustion_policy: policy,
    }
}

/// Runner over fakes, with history taken from the entries themselves
pub fn create_runner(
    pool: Arc<CredentialPool>,
    releases: Arc<FakeReleases>,
    pull_requests: FakePrSearch,
    entries: &[CatalogEntry],
    settings: ScheduleSettings,
) -> BatchRunner {
    let history: CatalogHistory = entries
        .iter()
        .map(|entry| (entry.package_id.clone(), entry.history.clone()))
        .collect();

    BatchRunner::new(
        pool,
        releases,
        Arc::new(pull_requests),
        Arc::new(history),
        default_pipeline(),
        settings,
    )
}

/// Catalog entry whose history holds its current URLs under its current version
pub fn catalog_entry(
    package_id: &str,
    repository: &str,
    current_version: &str,
    current_urls: &[&str],
    older: &[(&str, &[&str])],
) -> CatalogEntry {
    let mut versions: Vec<(String, Vec<String>)> = older
        .iter()
        .map(|(version, urls)| {
            (
                version.to_string(),
                urls.iter().map(|u| u.to_string()).collect(),
            )
        })
        .collect();
    versions.push((
        current_version.to_string(),
        current_urls.iter().map(|u| u.to_string()).collect(),
    ));

    CatalogEntry {
        package_id: package_id.to_string(),
        repository: Some(repository.to_string()),
        current_version: current_version.to_string(),
        current_urls: current_urls.iter().map(|u| u.to_string()).collect(),
        installer_url_count: None,
        history: versions.into_iter().collect(),
    }
}
