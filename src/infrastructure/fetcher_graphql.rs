#![allow(non_snake_case)]

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::{Client, StatusCode, header::HeaderMap};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    CrawlerError, FetcherRateLimit, RATE_LIMIT_FALLBACK_WAIT, RepositoryFetcher,
    RepositoryRecord, Response, SearchRequest, StdResult,
};

/// The GraphQL production endpoint for GitHub.
pub const GITHUB_GRAPHQL_ENDPOINT: &str = "https://api.github.com/graphql";

const SEARCH_QUERY: &str = r#"
query ($query: String!, $first: Int!, $after: String) {
  search(query: $query, type: REPOSITORY, first: $first, after: $after) {
    edges {
      node {
        ... on Repository {
          name
          owner {
            login
          }
          stargazerCount
          createdAt
        }
      }
    }
    pageInfo {
      endCursor
      hasNextPage
    }
  }
  rateLimit {
    limit
    cost
    remaining
    resetAt
  }
}
"#;

/// Fetcher error
#[derive(Error, Debug)]
pub enum FetcherError {
    /// Parse error
    #[error("Parsing error: {0}")]
    Parse(String),
    /// Remote error
    #[error("Remote error: {0}")]
    Remote(String),
    /// The API refused the request because the quota is used up
    #[error("Rate limited until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },
}

impl From<reqwest::Error> for FetcherError {
    fn from(error: reqwest::Error) -> Self {
        FetcherError::Remote(error.to_string())
    }
}

#[derive(Serialize, Debug)]
struct GraphQlRequestBody<'a> {
    query: &'a str,
    variables: GraphQlSearchQuery,
}

#[derive(Deserialize, Debug)]
struct GraphQlResponse {
    data: Option<SearchQueryData>,
    errors: Option<Vec<GraphQlErrorMessage>>,
}

#[derive(Deserialize, Debug)]
struct GraphQlErrorMessage {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: String,
}

#[derive(Deserialize, Debug)]
struct SearchQueryData {
    search: SearchResult,
    rateLimit: RateLimit,
}

#[derive(Deserialize, Debug)]
struct SearchResult {
    edges: Vec<Option<SearchEdge>>,
    pageInfo: PageInfo,
}

#[derive(Deserialize, Debug)]
struct SearchEdge {
    node: RepositoryNode,
}

#[derive(Deserialize, Debug)]
struct RepositoryNode {
    name: String,
    owner: Owner,
    stargazerCount: u32,
    createdAt: DateTime<Utc>,
}

#[derive(Deserialize, Debug)]
struct Owner {
    login: String,
}

#[derive(Deserialize, Debug)]
struct PageInfo {
    endCursor: Option<String>,
    hasNextPage: bool,
}

#[derive(Deserialize, Debug)]
struct RateLimit {
    limit: i32,
    cost: i32,
    remaining: i32,
    resetAt: String,
}

impl From<RateLimit> for FetcherRateLimit {
    fn from(rate_limit: RateLimit) -> Self {
        Self {
            limit: rate_limit.limit,
            cost: rate_limit.cost,
            remaining: rate_limit.remaining,
            reset_at: rate_limit.resetAt,
        }
    }
}

impl From<RepositoryNode> for RepositoryRecord {
    fn from(node: RepositoryNode) -> Self {
        RepositoryRecord::new(
            &node.owner.login,
            &node.name,
            node.stargazerCount,
            node.createdAt,
        )
    }
}

/// A GraphQL query for searching GitHub
#[derive(Debug, Serialize)]
struct GraphQlSearchQuery {
    /// The search query string.
    pub(super) query: String,
    /// The number of repositories to return.
    pub(super) first: u16,
    /// The cursor for pagination.
    pub(super) after: Option<String>,
}

impl From<&SearchRequest> for GraphQlSearchQuery {
    fn from(request: &SearchRequest) -> Self {
        Self {
            query: request.search_query(),
            first: request.first,
            after: request.after.to_owned(),
        }
    }
}

/// Fetches repository data from a GraphQL API.
pub struct GraphQlFetcher {
    client: Client,
    endpoint: String,
    github_api_token: String,
}

impl GraphQlFetcher {
    /// Creates a new `GraphQlFetcher` instance authenticated with the given bearer token.
    pub fn try_new(endpoint: &str, github_api_token: &str) -> StdResult<Self> {
        if github_api_token.trim().is_empty() {
            return Err(anyhow!(CrawlerError::Configuration(
                "Missing GitHub API token".to_string()
            )));
        }
        let client = Client::builder().user_agent("github-star-crawler").build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            github_api_token: github_api_token.trim().to_string(),
        })
    }

    /// Reset time announced by the rate limit headers, `Retry-After` or a default wait.
    fn rate_limit_reset(headers: &HeaderMap, now: DateTime<Utc>) -> DateTime<Utc> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<i64>().ok())
        };
        let reset_at =
            header("x-ratelimit-reset").and_then(|epoch| DateTime::from_timestamp(epoch, 0));
        let retry_after =
            header("retry-after").map(|seconds| now + chrono::Duration::seconds(seconds));

        reset_at.or(retry_after).unwrap_or_else(|| {
            now + chrono::Duration::seconds(RATE_LIMIT_FALLBACK_WAIT.as_secs() as i64)
        })
    }

    fn is_rate_limited(status: StatusCode, headers: &HeaderMap, body: &str) -> bool {
        match status {
            StatusCode::TOO_MANY_REQUESTS => true,
            StatusCode::FORBIDDEN => {
                headers
                    .get("x-ratelimit-remaining")
                    .is_some_and(|remaining| remaining.as_bytes() == b"0")
                    || headers.contains_key("retry-after")
                    || body.to_lowercase().contains("rate limit")
            }
            _ => false,
        }
    }
}

#[async_trait::async_trait]
impl RepositoryFetcher for GraphQlFetcher {
    async fn fetch(&self, request: &SearchRequest) -> StdResult<Response> {
        debug!("Sending {request}");
        let http_response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.github_api_token)
            .json(&GraphQlRequestBody {
                query: SEARCH_QUERY,
                variables: request.into(),
            })
            .send()
            .await
            .map_err(FetcherError::from)?;
        let status = http_response.status();
        let headers = http_response.headers().to_owned();
        let body = http_response.text().await.map_err(FetcherError::from)?;

        if Self::is_rate_limited(status, &headers, &body) {
            let reset_at = Self::rate_limit_reset(&headers, Utc::now());
            return Err(FetcherError::RateLimited { reset_at }.into());
        }
        if !status.is_success() {
            return Err(FetcherError::Remote(format!(
                "The response is [{}]: {body}",
                status.as_u16()
            ))
            .into());
        }

        let payload: GraphQlResponse = serde_json::from_str(&body).map_err(|e| {
            FetcherError::Parse(format!("{e}. The response body is: {body}"))
        })?;
        if let Some(errors) = payload.errors.filter(|errors| !errors.is_empty()) {
            if errors
                .iter()
                .any(|error| error.error_type.as_deref() == Some("RATE_LIMITED"))
            {
                let reset_at = Self::rate_limit_reset(&headers, Utc::now());
                return Err(FetcherError::RateLimited { reset_at }.into());
            }
            let messages = errors
                .into_iter()
                .map(|error| error.message)
                .collect::<Vec<_>>();
            return Err(FetcherError::Remote(messages.join("; ")).into());
        }
        let fetched_data = payload
            .data
            .ok_or_else(|| FetcherError::Parse(format!("No data in response: {body}")))?;

        let repositories = fetched_data
            .search
            .edges
            .into_iter()
            .flatten()
            .map(|edge| RepositoryRecord::from(edge.node))
            .filter(|repository| {
                let has_valid_key = repository.has_valid_key();
                if !has_valid_key {
                    warn!("Ignoring repository without owner or name: {repository}");
                }
                has_valid_key
            })
            .collect::<Vec<_>>();

        Ok(Response::new(
            repositories,
            fetched_data.search.pageInfo.hasNextPage,
            fetched_data.search.pageInfo.endCursor,
            fetched_data.rateLimit.into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use httpmock::MockServer;
    use serde_json::json;

    use crate::DateRangePartition;

    use super::*;

    fn mock_json_value() -> serde_json::Value {
        json!({
            "data": {
                "search": {
                    "edges": [
                        {
                            "node": {
                                "name": "repository-1",
                                "owner": {
                                    "login": "org-1"
                                },
                                "stargazerCount": 100,
                                "createdAt": "2019-01-15T12:00:00Z"
                            }
                        },
                        null,
                        {
                            "node": {
                                "name": "repository-2",
                                "owner": {
                                    "login": "org-2"
                                },
                                "stargazerCount": 200,
                                "createdAt": "2019-01-15T12:00:00Z"
                            }
                        }
                    ],
                    "pageInfo": {
                        "endCursor": Some("cursor123".to_string()),
                        "hasNextPage": true
                    }
                },
                "rateLimit": {
                    "limit": 5000,
                    "cost": 1,
                    "remaining": 4999,
                    "resetAt": "2025-01-01T00:00:00Z"
                }
            }
        })
    }

    #[tokio::test]
    async fn fetch_page_of_repositories() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("POST")
                .path("/")
                .header("Authorization", "Bearer credentials")
                .body_contains("is:public created:2019-01-01T00:00:00Z..2019-01-31T23:59:59Z");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(mock_json_value());
        });
        let fetcher = GraphQlFetcher::try_new(&server.url("/"), "credentials").unwrap();
        let request = SearchRequest::new("is:public", DateRangePartition::dummy(), 10, None);

        let response = fetcher.fetch(&request).await.unwrap();

        mock.assert();
        assert_eq!(
            Response::new(
                vec![
                    RepositoryRecord::dummy("org-1", "repository-1", 100),
                    RepositoryRecord::dummy("org-2", "repository-2", 200)
                ],
                true,
                Some("cursor123".to_string()),
                FetcherRateLimit::dummy()
            ),
            response
        );
    }

    #[tokio::test]
    async fn fetch_last_page_of_repositories() {
        let server = MockServer::start();
        let mut json_value = mock_json_value();
        json_value["data"]["search"]["pageInfo"] = json!({
            "endCursor": null,
            "hasNextPage": false
        });
        let mock = server.mock(|when, then| {
            when.method("POST")
                .path("/")
                .body_contains("cursor-previous");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json_value);
        });
        let fetcher = GraphQlFetcher::try_new(&server.url("/"), "credentials").unwrap();
        let request = SearchRequest::new(
            "is:public",
            DateRangePartition::dummy(),
            10,
            Some("cursor-previous".to_string()),
        );

        let response = fetcher.fetch(&request).await.unwrap();

        mock.assert();
        assert!(!response.has_next_page());
        assert_eq!(None, response.end_cursor());
        assert_eq!(2, response.repositories().len());
    }

    #[tokio::test]
    async fn fetch_fails_on_server_error() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("POST").path("/");
            then.status(502).body("Bad gateway");
        });
        let fetcher = GraphQlFetcher::try_new(&server.url("/"), "credentials").unwrap();

        fetcher
            .fetch(&SearchRequest::dummy())
            .await
            .expect_err("Server error should fail the fetch");
        mock.assert();
    }

    #[tokio::test]
    async fn fetch_fails_on_malformed_payload() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("POST").path("/");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({"data": {"search": {"edges": "unexpected"}}}));
        });
        let fetcher = GraphQlFetcher::try_new(&server.url("/"), "credentials").unwrap();

        fetcher
            .fetch(&SearchRequest::dummy())
            .await
            .expect_err("Malformed payload should fail the fetch");
        mock.assert();
    }

    #[tokio::test]
    async fn fetch_reports_rate_limit_on_forbidden_response() {
        let reset_epoch = Utc::now().timestamp() + 3600;
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("POST").path("/");
            then.status(403)
                .header("X-RateLimit-Remaining", "0")
                .header("X-RateLimit-Reset", reset_epoch.to_string())
                .json_body(json!({"message": "API rate limit exceeded for user ID 1."}));
        });
        let fetcher = GraphQlFetcher::try_new(&server.url("/"), "credentials").unwrap();

        let error = fetcher
            .fetch(&SearchRequest::dummy())
            .await
            .expect_err("Exhausted quota should fail the fetch");

        mock.assert();
        match error.downcast_ref::<FetcherError>() {
            Some(FetcherError::RateLimited { reset_at }) => {
                assert_eq!(reset_epoch, reset_at.timestamp());
            }
            other => panic!("Expected a rate limited error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_reports_rate_limit_on_graphql_error_type() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("POST").path("/");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({
                    "errors": [
                        {
                            "type": "RATE_LIMITED",
                            "message": "API rate limit exceeded for user ID 1."
                        }
                    ]
                }));
        });
        let fetcher = GraphQlFetcher::try_new(&server.url("/"), "credentials").unwrap();
        let before = Utc::now();

        let error = fetcher
            .fetch(&SearchRequest::dummy())
            .await
            .expect_err("Rate limited payload should fail the fetch");

        mock.assert();
        match error.downcast_ref::<FetcherError>() {
            Some(FetcherError::RateLimited { reset_at }) => {
                assert!(*reset_at >= before + chrono::Duration::seconds(59));
                assert!(*reset_at <= Utc::now() + chrono::Duration::seconds(60));
            }
            other => panic!("Expected a rate limited error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_fails_on_graphql_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("POST").path("/");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({
                    "errors": [{"type": "INVALID_QUERY", "message": "Invalid search query"}]
                }));
        });
        let fetcher = GraphQlFetcher::try_new(&server.url("/"), "credentials").unwrap();

        let error = fetcher
            .fetch(&SearchRequest::dummy())
            .await
            .expect_err("GraphQL errors should fail the fetch");

        assert!(matches!(
            error.downcast_ref::<FetcherError>(),
            Some(FetcherError::Remote(message)) if message.contains("Invalid search query")
        ));
    }

    #[tokio::test]
    async fn fetch_forbidden_without_rate_limit_is_a_remote_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("POST").path("/");
            then.status(403)
                .header("X-RateLimit-Remaining", "4000")
                .json_body(json!({"message": "Resource not accessible by integration"}));
        });
        let fetcher = GraphQlFetcher::try_new(&server.url("/"), "credentials").unwrap();

        let error = fetcher
            .fetch(&SearchRequest::dummy())
            .await
            .expect_err("Forbidden response should fail the fetch");

        assert!(matches!(
            error.downcast_ref::<FetcherError>(),
            Some(FetcherError::Remote(_))
        ));
    }

    #[test]
    fn try_new_fails_without_token() {
        let error = GraphQlFetcher::try_new(GITHUB_GRAPHQL_ENDPOINT, " ")
            .err()
            .expect("Missing token should be rejected");

        assert!(matches!(
            error.downcast_ref::<CrawlerError>(),
            Some(CrawlerError::Configuration(_))
        ));
    }
}
