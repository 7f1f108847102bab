//! Pull request search against the catalog repository (GitHub GraphQL)

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::credential::Credential;
use crate::error::FetchError;
use crate::fetch::github::USER_AGENT;
use crate::fetch::{Fetched, PrSearcher, PrState, quota_from_headers, rate_limit_error};

/// Default GraphQL endpoint
pub const DEFAULT_GRAPHQL_URL: &str = "https://api.github.com/graphql";

/// Default catalog repository searched for pull requests
pub const DEFAULT_CATALOG_REPO: &str = "microsoft/winget-pkgs";

/// GitHub caps search pages; the newest handful is enough to find the latest PR
const MAX_RESULTS: u32 = 20;

const SEARCH_QUERY: &str = r#"
query SearchPackagePRs($query: String!, $first: Int!) {
    search(query: $query, type: ISSUE, first: $first) {
        nodes {
            ... on PullRequest {
                number
                title
                state
                createdAt
                body
            }
        }
    }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<SearchData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    search: SearchConnection,
}

#[derive(Debug, Deserialize)]
struct SearchConnection {
    #[serde(default)]
    nodes: Vec<PullRequestNode>,
}

// Non-PR search hits come back as empty objects.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PullRequestNode {
    number: Option<u64>,
    title: String,
    state: String,
    created_at: String,
    body: Option<String>,
}

/// Searches `repo:{catalog} is:pr "{package}" in:title` and reports the
/// state of the most recently created relevant pull request.
pub struct GitHubPrSearch {
    client: reqwest::Client,
    graphql_url: String,
    catalog_repo: String,
}

impl GitHubPrSearch {
    pub fn new(
        graphql_url: &str,
        catalog_repo: &str,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            graphql_url: graphql_url.to_string(),
            catalog_repo: catalog_repo.to_string(),
        })
    }

    fn search_string(&self, package_id: &str) -> String {
        format!(
            "repo:{} is:pr \"{}\" in:title",
            self.catalog_repo,
            package_id.replace('"', "\\\"")
        )
    }
}

/// Variants of the package id that count as a mention
fn search_terms(package_id: &str) -> Vec<String> {
    let lower = package_id.to_lowercase();
    let mut terms = vec![
        lower.clone(),
        lower.replace('.', ""),
        lower.replace('-', ""),
        lower.replace('_', ""),
    ];
    terms.dedup();
    terms
}

fn mentions_package(node: &PullRequestNode, terms: &[String]) -> bool {
    let title = node.title.to_lowercase();
    let body = node.body.as_deref().unwrap_or_default().to_lowercase();
    terms
        .iter()
        .any(|term| title.contains(term.as_str()) || body.contains(term.as_str()))
}

fn parse_state(state: &str) -> Option<PrState> {
    match state.to_ascii_uppercase().as_str() {
        "OPEN" => Some(PrState::Open),
        "CLOSED" => Some(PrState::Closed),
        "MERGED" => Some(PrState::Merged),
        _ => None,
    }
}

/// State of the newest PR that actually mentions the package
fn latest_relevant_state(package_id: &str, nodes: &[PullRequestNode]) -> PrState {
    let terms = search_terms(package_id);

    nodes
        .iter()
        .filter(|node| node.number.is_some() && mentions_package(node, &terms))
        .filter_map(|node| {
            let created = DateTime::parse_from_rfc3339(&node.created_at)
                .ok()?
                .with_timezone(&Utc);
            Some((created, parse_state(&node.state)?))
        })
        .max_by_key(|(created, _)| *created)
        .map(|(_, state)| state)
        .unwrap_or(PrState::NotFound)
}

#[async_trait::async_trait]
impl PrSearcher for GitHubPrSearch {
    async fn search_pr(
        &self,
        package_id: &str,
        credential: &Credential,
    ) -> Result<Fetched<PrState>, FetchError> {
        let body = json!({
            "query": SEARCH_QUERY,
            "variables": {
                "query": self.search_string(package_id),
                "first": MAX_RESULTS,
            }
        });

        let response = self
            .client
            .post(&self.graphql_url)
            .bearer_auth(credential.token())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let quota = quota_from_headers(&headers);

        if let Some(error) = rate_limit_error(status, &headers, Utc::now()) {
            return Err(error);
        }

        if !status.is_success() {
            warn!("GraphQL search returned status {} for {}", status, package_id);
            return Err(FetchError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }

        let parsed: GraphQlResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse GraphQL search response: {}", e);
            FetchError::InvalidResponse(e.to_string())
        })?;

        if let Some(error) = parsed.errors.first() {
            if error.message.to_lowercase().contains("rate limit") {
                return Err(FetchError::RateLimited {
                    retry_after_secs: None,
                });
            }
            return Err(FetchError::InvalidResponse(error.message.clone()));
        }

        let nodes = parsed.data.map(|d| d.search.nodes).unwrap_or_default();
        let state = latest_relevant_state(package_id, &nodes);
        debug!(
            "PR search for {}: {} results, state {}",
            package_id,
            nodes.len(),
            state.as_str()
        );

        Ok(Fetched {
            value: state,
            quota,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialPool;
    use mockito::{Matcher, Server};
    use rstest::rstest;

    fn credential() -> Credential {
        CredentialPool::new(vec!["test-token".to_string()], Duration::from_secs(60))
            .unwrap()
            .acquire()
            .unwrap()
    }

    fn node(title: &str, state: &str, created_at: &str) -> PullRequestNode {
        PullRequestNode {
            number: Some(1),
            title: title.to_string(),
            state: state.to_string(),
            created_at: created_at.to_string(),
            body: None,
        }
    }

    #[rstest]
    #[case(vec![], PrState::NotFound)]
    #[case(vec![node("New version: Foo.Bar 1.0", "OPEN", "2024-01-01T00:00:00Z")], PrState::Open)]
    #[case(vec![
        node("New version: Foo.Bar 1.0", "MERGED", "2024-01-01T00:00:00Z"),
        node("New version: Foo.Bar 1.1", "OPEN", "2024-03-01T00:00:00Z"),
        node("New version: Foo.Bar 0.9", "CLOSED", "2023-01-01T00:00:00Z"),
    ], PrState::Open)]
    #[case(vec![
        node("New version: Foo.Bar 1.1", "CLOSED", "2024-03-01T00:00:00Z"),
        node("Unrelated.Package 2.0", "OPEN", "2024-05-01T00:00:00Z"),
    ], PrState::Closed)]
    #[case(vec![node("New version: FooBar 1.0", "MERGED", "2024-01-01T00:00:00Z")], PrState::Merged)]
    fn latest_relevant_state_returns_expected(
        #[case] nodes: Vec<PullRequestNode>,
        #[case] expected: PrState,
    ) {
        assert_eq!(latest_relevant_state("Foo.Bar", &nodes), expected);
    }

    #[test]
    fn latest_relevant_state_ignores_non_pull_request_nodes() {
        let nodes = vec![PullRequestNode::default()];
        assert_eq!(latest_relevant_state("Foo.Bar", &nodes), PrState::NotFound);
    }

    #[tokio::test]
    async fn search_pr_posts_query_and_returns_state() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("POST", "/graphql")
            .match_header("authorization", "Bearer test-token")
            .match_body(Matcher::Regex(
                r#"repo:microsoft/winget-pkgs is:pr"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("x-ratelimit-remaining", "4000")
            .with_header("x-ratelimit-reset", "1700000000")
            .with_body(
                r#"{"data": {"search": {"nodes": [
                    {"number": 7, "title": "New version: Foo.Bar version 2.0", "state": "OPEN", "createdAt": "2024-02-01T10:00:00Z", "body": ""},
                    {}
                ]}}}"#,
            )
            .create_async()
            .await;

        let searcher = GitHubPrSearch::new(
            &format!("{}/graphql", server.url()),
            DEFAULT_CATALOG_REPO,
            Duration::from_secs(5),
        )
        .unwrap();
        let result = searcher.search_pr("Foo.Bar", &credential()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(result.value, PrState::Open);
        assert_eq!(result.quota.map(|q| q.remaining), Some(4000));
    }

    #[tokio::test]
    async fn search_pr_maps_graphql_rate_limit_error() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"errors": [{"message": "API rate limit exceeded for user"}]}"#)
            .create_async()
            .await;

        let searcher = GitHubPrSearch::new(
            &format!("{}/graphql", server.url()),
            DEFAULT_CATALOG_REPO,
            Duration::from_secs(5),
        )
        .unwrap();
        let result = searcher.search_pr("Foo.Bar", &credential()).await;

        mock.assert_async().await;
        assert!(matches!(result, Err(FetchError::RateLimited { .. })));
    }
}
