//! GitHub Releases API client

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::credential::Credential;
use crate::error::FetchError;
use crate::fetch::{Fetched, ReleaseFetcher, ReleaseSnapshot, quota_from_headers, rate_limit_error};

/// Default base URL for GitHub API
pub const DEFAULT_API_URL: &str = "https://api.github.com";

pub(crate) const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Response from the latest-release endpoint
#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    browser_download_url: String,
}

/// Release fetcher backed by `GET /repos/{owner}/{repo}/releases/latest`
pub struct GitHubReleases {
    client: reqwest::Client,
    base_url: String,
}

impl GitHubReleases {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ReleaseFetcher for GitHubReleases {
    async fn latest_release(
        &self,
        owner: &str,
        repo: &str,
        credential: &Credential,
    ) -> Result<Fetched<Option<ReleaseSnapshot>>, FetchError> {
        let url = format!("{}/repos/{}/{}/releases/latest", self.base_url, owner, repo);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .bearer_auth(credential.token())
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let quota = quota_from_headers(&headers);

        if let Some(error) = rate_limit_error(status, &headers, Utc::now()) {
            return Err(error);
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            debug!("No release found for {}/{}", owner, repo);
            return Ok(Fetched { value: None, quota });
        }

        if !status.is_success() {
            warn!("GitHub API returned status {}: {}", status, url);
            return Err(FetchError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }

        let release: Release = response.json().await.map_err(|e| {
            warn!("Failed to parse GitHub release response: {}", e);
            FetchError::InvalidResponse(e.to_string())
        })?;

        let snapshot = ReleaseSnapshot {
            version: release.tag_name,
            urls: release
                .assets
                .into_iter()
                .map(|asset| asset.browser_download_url)
                .collect(),
            source: format!("{}/{}", owner, repo),
        };

        Ok(Fetched {
            value: Some(snapshot),
            quota,
        })
    }
}
