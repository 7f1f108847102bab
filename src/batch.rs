//! Batched, rate-limit aware evaluation of catalog packages
//!
//! Packages are split into fixed-size batches. Inside a batch at most
//! `concurrency` evaluations are in flight; between batches the scheduler
//! pauses. Each package gets exactly one verdict, in input order, whatever
//! happens to the others.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{CatalogEntry, Config, ExhaustionPolicy, ScheduleSettings};
use crate::credential::{Credential, CredentialPool};
use crate::decision::{DecisionPipeline, ErrorKind, Verdict, early_rejection};
use crate::error::{ConfigError, CredentialError, FetchError, RunError};
use crate::fetch::{Fetched, GitHubPrSearch, GitHubReleases, PrSearcher, PrState, ReleaseFetcher};
use crate::history::{CatalogHistory, HistoryProvider};
use crate::url::MatchEngine;

/// Floor for credential waits so repeated zero-length waits still use up
/// the `max_wait` budget
const MIN_CREDENTIAL_WAIT: Duration = Duration::from_millis(100);

/// Why a lookup produced no value
#[derive(Debug)]
enum LookupError {
    Credentials(CredentialError),
    Fetch(FetchError),
}

impl From<CredentialError> for LookupError {
    fn from(error: CredentialError) -> Self {
        LookupError::Credentials(error)
    }
}

fn error_kind(error: &FetchError) -> ErrorKind {
    match error {
        FetchError::Network(_) => ErrorKind::Network,
        FetchError::InvalidResponse(_) => ErrorKind::InvalidResponse,
        FetchError::RateLimited { .. } => ErrorKind::CredentialExhausted,
    }
}

pub struct BatchRunner {
    pool: Arc<CredentialPool>,
    releases: Arc<dyn ReleaseFetcher>,
    pull_requests: Arc<dyn PrSearcher>,
    history: Arc<dyn HistoryProvider>,
    pipeline: DecisionPipeline,
    settings: ScheduleSettings,
}

impl BatchRunner {
    pub fn new(
        pool: Arc<CredentialPool>,
        releases: Arc<dyn ReleaseFetcher>,
        pull_requests: Arc<dyn PrSearcher>,
        history: Arc<dyn HistoryProvider>,
        pipeline: DecisionPipeline,
        settings: ScheduleSettings,
    ) -> Self {
        Self {
            pool,
            releases,
            pull_requests,
            history,
            pipeline,
            settings,
        }
    }

    /// Wires the GitHub clients and the catalog's own history
    pub fn from_config(config: &Config, entries: &[CatalogEntry]) -> Result<Self, RunError> {
        let pool = CredentialPool::new(config.credentials.clone(), config.default_backoff)
            .map_err(ConfigError::from)?;
        let releases = GitHubReleases::new(&config.github.api_url, config.fetch_timeout)?;
        let pull_requests = GitHubPrSearch::new(
            &config.github.graphql_url,
            &config.github.catalog_repo,
            config.fetch_timeout,
        )?;
        let history: CatalogHistory = entries
            .iter()
            .map(|entry| (entry.package_id.clone(), entry.history.clone()))
            .collect();

        Ok(Self::new(
            Arc::new(pool),
            Arc::new(releases),
            Arc::new(pull_requests),
            Arc::new(history),
            DecisionPipeline::new(config.extractor.clone(), MatchEngine::new()),
            config.schedule,
        ))
    }

    /// Evaluates every entry and returns one verdict per entry, in order
    pub async fn run(&self, entries: &[CatalogEntry]) -> Vec<Verdict> {
        let mut verdicts: Vec<Option<Verdict>> = vec![None; entries.len()];
        let semaphore = Semaphore::new(self.settings.concurrency.max(1));
        let indices: Vec<usize> = (0..entries.len()).collect();
        let batch_count = indices.len().div_ceil(self.settings.batch_size.max(1));
        let mut waited = Duration::ZERO;

        for (batch, chunk) in indices.chunks(self.settings.batch_size.max(1)).enumerate() {
            if batch > 0 {
                debug!("Sleeping {:?} before next batch", self.settings.batch_delay);
                sleep(self.settings.batch_delay).await;
            }
            info!(
                "Processing batch {}/{} ({} packages)",
                batch + 1,
                batch_count,
                chunk.len()
            );

            if !self.run_batch(entries, chunk, &semaphore, &mut verdicts, &mut waited).await {
                break;
            }
        }

        let undecided = verdicts.iter().filter(|v| v.is_none()).count();
        if undecided > 0 {
            error!(
                "Credentials exhausted: {} packages left undecided",
                undecided
            );
        }

        for status in self.pool.status() {
            debug!(
                "Credential {}: quota {:?}, available {}",
                status.token, status.quota, status.available
            );
        }

        verdicts
            .into_iter()
            .zip(entries)
            .map(|(verdict, entry)| {
                verdict.unwrap_or_else(|| {
                    Verdict::error(
                        &entry.package_id,
                        &entry.current_version,
                        ErrorKind::CredentialExhausted,
                    )
                })
            })
            .collect()
    }

    /// Runs one batch, retrying packages that hit credential exhaustion
    /// while the policy allows. `waited` is the credential wait spent so far
    /// across the whole run. Returns false when scheduling must stop.
    async fn run_batch(
        &self,
        entries: &[CatalogEntry],
        chunk: &[usize],
        semaphore: &Semaphore,
        verdicts: &mut [Option<Verdict>],
        waited: &mut Duration,
    ) -> bool {
        let mut pending: Vec<usize> = chunk.to_vec();

        loop {
            let results = join_all(pending.iter().map(|&index| async move {
                let _permit = semaphore.acquire().await.ok();
                (index, self.evaluate(&entries[index]).await)
            }))
            .await;

            let mut exhausted = Vec::new();
            let mut wait = Duration::ZERO;
            for (index, result) in results {
                match result {
                    Ok(verdict) => verdicts[index] = Some(verdict),
                    Err(CredentialError::Exhausted { wait: w }) => {
                        exhausted.push(index);
                        wait = wait.max(w);
                    }
                    Err(CredentialError::Empty) => exhausted.push(index),
                }
            }

            if exhausted.is_empty() {
                return true;
            }

            let wait = wait.max(MIN_CREDENTIAL_WAIT);
            let within_budget = *waited + wait <= self.settings.max_wait;
            match self.settings.exhaustion_policy {
                ExhaustionPolicy::Wait if within_budget => {
                    warn!(
                        "{} packages waiting {:?} for a credential to reset",
                        exhausted.len(),
                        wait
                    );
                    sleep(wait).await;
                    *waited += wait;
                    pending = exhausted;
                }
                ExhaustionPolicy::Wait => {
                    error!(
                        "Credential wait {:?} exceeds the remaining budget of {:?}, aborting",
                        wait,
                        self.settings.max_wait.saturating_sub(*waited)
                    );
                    return false;
                }
                ExhaustionPolicy::Abort => {
                    error!("All credentials exhausted, aborting run");
                    return false;
                }
            }
        }
    }

    /// Gathers the facts for one package and decides it.
    ///
    /// Only credential exhaustion escapes as an error; every other failure
    /// becomes an error verdict for this package.
    async fn evaluate(&self, entry: &CatalogEntry) -> Result<Verdict, CredentialError> {
        let package_id = entry.package_id.as_str();

        let upstream = match entry.upstream_repository() {
            Some((owner, repo)) => {
                let lookup = self
                    .with_credential(async |credential: &Credential| {
                        self.releases.latest_release(&owner, &repo, credential).await
                    })
                    .await;
                match lookup {
                    Ok(upstream) => upstream,
                    Err(error) => return self.lookup_failed(entry, error),
                }
            }
            None => {
                debug!("No upstream repository known for {}", package_id);
                None
            }
        };

        let pr_state = match early_rejection(upstream.as_ref()) {
            Some(rule) => {
                debug!("Skipping PR search for {}: {}", package_id, rule);
                PrState::NotSearched
            }
            None => {
                let lookup = self
                    .with_credential(async |credential: &Credential| {
                        self.pull_requests.search_pr(package_id, credential).await
                    })
                    .await;
                match lookup {
                    Ok(state) => state,
                    Err(error) => return self.lookup_failed(entry, error),
                }
            }
        };

        let history = self.history.history(package_id).unwrap_or_else(|e| {
            debug!("{}; treating as empty", e);
            Default::default()
        });

        let record = self.pipeline.assemble(entry, upstream, &history, pr_state);
        let verdict = self.pipeline.decide(&record);
        info!(
            "{}: {} {}",
            package_id,
            verdict.outcome.label(),
            verdict.outcome.reason()
        );
        Ok(verdict)
    }

    fn lookup_failed(
        &self,
        entry: &CatalogEntry,
        error: LookupError,
    ) -> Result<Verdict, CredentialError> {
        match error {
            LookupError::Credentials(error) => Err(error),
            LookupError::Fetch(error) => {
                warn!("Lookup failed for {}: {}", entry.package_id, error);
                Ok(Verdict::error(
                    &entry.package_id,
                    &entry.current_version,
                    error_kind(&error),
                ))
            }
        }
    }

    /// Runs `call` with pooled credentials, feeding quota back into the
    /// pool. A rate-limited credential is marked exhausted and the call is
    /// retried with the next one, at most once per credential.
    async fn with_credential<T, F>(&self, call: F) -> Result<T, LookupError>
    where
        F: AsyncFn(&Credential) -> Result<Fetched<T>, FetchError>,
    {
        for _ in 0..self.pool.len() {
            let credential = self.pool.acquire()?;

            match call(&credential).await {
                Ok(fetched) => {
                    if let Some(quota) = fetched.quota {
                        self.pool.report(&credential, quota.remaining, quota.reset_at);
                    }
                    return Ok(fetched.value);
                }
                Err(FetchError::RateLimited { retry_after_secs }) => {
                    self.pool
                        .mark_exhausted(&credential, retry_after_secs.map(Duration::from_secs));
                }
                Err(error) => return Err(LookupError::Fetch(error)),
            }
        }

        Err(LookupError::Credentials(CredentialError::Exhausted {
            wait: self.pool.shortest_wait(),
        }))
    }
}
