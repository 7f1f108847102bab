//! Outbound lookups: upstream releases and catalog pull requests
//!
//! The traits here are the seams the batch scheduler depends on; the GitHub
//! implementations live in [`github`] and [`pull_requests`]. Every call takes
//! a [`Credential`] from the pool and hands back the quota the server
//! reported so the caller can feed it to [`CredentialPool::report`].
//!
//! [`CredentialPool::report`]: crate::credential::CredentialPool::report

pub mod github;
pub mod pull_requests;

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Serialize;

#[cfg(test)]
use mockall::automock;

use crate::credential::{Credential, Quota};
use crate::error::FetchError;

pub use github::GitHubReleases;
pub use pull_requests::GitHubPrSearch;

/// Latest upstream release of a project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSnapshot {
    pub version: String,
    pub urls: Vec<String>,
    /// `owner/repo` the release was read from
    pub source: String,
}

/// State of the most relevant catalog pull request for a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Closed,
    Merged,
    /// The search ran and found no relevant pull request
    NotFound,
    /// The search was skipped because an earlier rule already rejected
    NotSearched,
}

impl PrState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrState::Open => "open",
            PrState::Closed => "closed",
            PrState::Merged => "merged",
            PrState::NotFound => "not_found",
            PrState::NotSearched => "not_searched",
        }
    }
}

/// A response value plus the quota snapshot that came with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<T> {
    pub value: T,
    pub quota: Option<Quota>,
}

/// Fetches the latest release of an upstream project
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ReleaseFetcher: Send + Sync {
    /// Returns `None` as the value when the project has no published release
    async fn latest_release(
        &self,
        owner: &str,
        repo: &str,
        credential: &Credential,
    ) -> Result<Fetched<Option<ReleaseSnapshot>>, FetchError>;
}

/// Searches the catalog repository for pull requests about a package
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait PrSearcher: Send + Sync {
    async fn search_pr(
        &self,
        package_id: &str,
        credential: &Credential,
    ) -> Result<Fetched<PrState>, FetchError>;
}

/// Reads `x-ratelimit-remaining` / `x-ratelimit-reset` headers
pub(crate) fn quota_from_headers(headers: &HeaderMap) -> Option<Quota> {
    let remaining = header_u64(headers, "x-ratelimit-remaining")?;
    let reset = header_u64(headers, "x-ratelimit-reset")?;
    let reset_at = DateTime::<Utc>::from_timestamp(i64::try_from(reset).ok()?, 0)?;

    Some(Quota {
        remaining,
        reset_at,
    })
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Maps a rate-limit response to [`FetchError::RateLimited`].
///
/// GitHub answers 429, or 403 with an exhausted quota. Secondary limits are
/// a 403 carrying `retry-after` while the primary quota is still positive.
/// The retry hint comes from `retry-after`, or else from the quota reset time.
pub(crate) fn rate_limit_error(
    status: StatusCode,
    headers: &HeaderMap,
    now: DateTime<Utc>,
) -> Option<FetchError> {
    let quota = quota_from_headers(headers);
    let quota_exhausted = quota.is_some_and(|q| q.remaining == 0);
    let retry_after = header_u64(headers, "retry-after");

    let limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && (quota_exhausted || retry_after.is_some()));
    if !limited {
        return None;
    }

    let retry_after_secs = retry_after.or_else(|| {
        quota
            .filter(|q| q.remaining == 0)
            .and_then(|q| (q.reset_at - now).to_std().ok())
            .map(|wait: Duration| wait.as_secs())
    });

    Some(FetchError::RateLimited { retry_after_secs })
}

static GITHUB_REPO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"github\.com/([^/?#]+)/([^/?#]+)").unwrap());

/// Extracts `(owner, repo)` from the first GitHub URL in `urls`
pub fn github_repo_from_urls<'a, I>(urls: I) -> Option<(String, String)>
where
    I: IntoIterator<Item = &'a str>,
{
    urls.into_iter().find_map(|url| {
        let captures = GITHUB_REPO_RE.captures(url)?;
        let owner = captures.get(1)?.as_str();
        let repo = captures.get(2)?.as_str().trim_end_matches(".git");
        Some((owner.to_string(), repo.to_string()))
    })
}

/// Splits an explicit `owner/repo` string
pub fn parse_repository(repository: &str) -> Option<(String, String)> {
    let (owner, repo) = repository.trim().split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}
