use graphql_client::Response as GraphQLResponse;
use log::warn;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::auth::Token;
use crate::error::{ComLensError, Result};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY_SECONDS: u64 = 5;
const REST_PAGE_SIZE: usize = 100;

/// Pagination state extracted from one page payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// Repository overview row from the org repos REST endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OrgRepo {
    pub name: String,
    pub stargazers_count: i64,
    pub forks_count: i64,
    pub open_issues_count: i64,
}

pub struct GitHubClient {
    client: Client,
    base_url: Url,
    graphql_url: Url,
    token: Token,
}

impl GitHubClient {
    pub fn new(base_url: &str, token: Token) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("comlens/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ComLensError::Config(format!("Failed to create HTTP client: {e}")))?;

        let base_url = Url::parse(base_url)
            .map_err(|e| ComLensError::Config(format!("Invalid base URL: {e}")))?;

        let graphql_url = base_url
            .join("graphql")
            .map_err(|e| ComLensError::Config(format!("Invalid GraphQL URL: {e}")))?;

        Ok(Self {
            client,
            base_url,
            graphql_url,
            token,
        })
    }

    /// Execute one GraphQL request, retrying non-success HTTP statuses with a
    /// fixed delay before failing the run.
    ///
    /// GraphQL-level errors and an empty `data` field are raised immediately
    /// without retry: they indicate a query or auth problem, not transience.
    pub async fn execute_graphql<T>(
        &self,
        document: &str,
        variables: serde_json::Value,
    ) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let request_body = serde_json::json!({
            "query": document,
            "variables": variables,
        });

        let mut attempts = 0;
        loop {
            let request = self
                .client
                .post(self.graphql_url.clone())
                .bearer_auth(self.token.as_str())
                .json(&request_body);

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    attempts += 1;
                    if attempts >= MAX_ATTEMPTS {
                        return Err(e.into());
                    }
                    warn!(
                        "Attempt {attempts}/{MAX_ATTEMPTS} failed ({e}). Retrying in {RETRY_DELAY_SECONDS}s..."
                    );
                    tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECONDS)).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            if !status.is_success() {
                attempts += 1;
                if attempts >= MAX_ATTEMPTS {
                    return Err(ComLensError::ApiAfterRetries {
                        status: status.as_u16(),
                        attempts: MAX_ATTEMPTS,
                    });
                }
                warn!(
                    "Attempt {attempts}/{MAX_ATTEMPTS} failed with status {status}. Retrying in {RETRY_DELAY_SECONDS}s..."
                );
                tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECONDS)).await;
                continue;
            }

            let response_body: GraphQLResponse<T> = response.json().await?;

            if let Some(errors) = response_body.errors {
                return Err(ComLensError::GraphQL(
                    errors
                        .iter()
                        .map(|e| &e.message)
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", "),
                ));
            }

            return response_body.data.ok_or(ComLensError::NoResponseData);
        }
    }

    /// Fetch every page of a cursor-paginated GraphQL query.
    ///
    /// The extractor maps one page payload to its records plus pagination
    /// state; the cursor is threaded back into `variables["cursor"]` until
    /// `has_next_page` goes false. Records come back in page-arrival order,
    /// without dedup — aggregation is the caller's job.
    pub async fn fetch_paginated<T, R, F>(
        &self,
        document: &str,
        base_variables: serde_json::Value,
        extract: F,
    ) -> Result<Vec<R>>
    where
        T: serde::de::DeserializeOwned,
        F: Fn(T) -> Result<(Vec<R>, PageInfo)>,
    {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut variables = base_variables.clone();
            variables["cursor"] = match &cursor {
                Some(c) => serde_json::Value::String(c.clone()),
                None => serde_json::Value::Null,
            };

            let data: T = self.execute_graphql(document, variables).await?;
            let (page_records, page_info) = extract(data)?;
            records.extend(page_records);

            if !page_info.has_next_page {
                break;
            }

            cursor = page_info.end_cursor;
            // An exhausted cursor with hasNextPage still set would loop forever.
            if cursor.is_none() {
                break;
            }
        }

        Ok(records)
    }

    /// Fetch all repositories of an organization via the REST API.
    pub async fn fetch_org_repos(&self, org: &str) -> Result<Vec<OrgRepo>> {
        let mut all_repos = Vec::new();
        let mut page = 1;

        loop {
            let mut url = self
                .base_url
                .join(&format!("orgs/{org}/repos"))
                .map_err(|e| ComLensError::Config(format!("Invalid org repos URL: {e}")))?;
            url.query_pairs_mut()
                .append_pair("per_page", &REST_PAGE_SIZE.to_string())
                .append_pair("page", &page.to_string());

            let response = self
                .client
                .get(url)
                .bearer_auth(self.token.as_str())
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());
                return Err(ComLensError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let repos: Vec<OrgRepo> = response.json().await?;
            let page_len = repos.len();
            all_repos.extend(repos);

            if page_len < REST_PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(all_repos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::github::queries::{self, OrgData, PullRequestsRepo};
    use mockito::Matcher;
    use serde_json::json;

    fn page_body(repo: &str, prs: &[&str], cursor: Option<&str>) -> String {
        json!({
            "data": {
                "organization": {
                    "repositories": {
                        "nodes": [{
                            "name": repo,
                            "pullRequests": {
                                "nodes": prs.iter()
                                    .map(|login| json!({"author": {"login": login}}))
                                    .collect::<Vec<_>>()
                            }
                        }],
                        "pageInfo": {
                            "hasNextPage": cursor.is_some(),
                            "endCursor": cursor
                        }
                    }
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_fetch_paginated_follows_cursors() {
        let mut server = mockito::Server::new_async().await;

        let page1 = server
            .mock("POST", "/graphql")
            .match_body(Matcher::PartialJson(json!({"variables": {"cursor": null}})))
            .with_status(200)
            .with_body(page_body("repo-a", &["alice", "carol"], Some("c1")))
            .expect(1)
            .create_async()
            .await;
        let page2 = server
            .mock("POST", "/graphql")
            .match_body(Matcher::PartialJson(json!({"variables": {"cursor": "c1"}})))
            .with_status(200)
            .with_body(page_body("repo-b", &["bob", "bob"], Some("c2")))
            .expect(1)
            .create_async()
            .await;
        let page3 = server
            .mock("POST", "/graphql")
            .match_body(Matcher::PartialJson(json!({"variables": {"cursor": "c2"}})))
            .with_status(200)
            .with_body(page_body("repo-c", &["alice", "dave"], None))
            .expect(1)
            .create_async()
            .await;

        let client = GitHubClient::new(&server.url(), Token::from("test-token")).unwrap();
        let repos: Vec<PullRequestsRepo> = client
            .fetch_paginated(
                queries::PULL_REQUESTS,
                json!({"org": "w3b3d3v"}),
                |data: OrgData<PullRequestsRepo>| data.into_page(),
            )
            .await
            .unwrap();

        page1.assert_async().await;
        page2.assert_async().await;
        page3.assert_async().await;

        // Union of all pages, in page-arrival order, nothing lost or duplicated.
        let names: Vec<&str> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["repo-a", "repo-b", "repo-c"]);

        let authors: Vec<&str> = repos
            .iter()
            .flat_map(|r| r.pull_requests.nodes.iter())
            .map(|pr| pr.author.as_ref().map(|a| a.login.as_str()).unwrap_or("Unknown"))
            .collect();
        assert_eq!(authors, vec!["alice", "carol", "bob", "bob", "alice", "dave"]);
    }

    #[tokio::test]
    async fn test_graphql_errors_fail_immediately_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(json!({"errors": [{"message": "Bad credentials"}]}).to_string())
            .expect(1)
            .create_async()
            .await;

        let client = GitHubClient::new(&server.url(), Token::from("bad-token")).unwrap();
        let result: Result<OrgData<PullRequestsRepo>> = client
            .execute_graphql(queries::PULL_REQUESTS, json!({"org": "w3b3d3v"}))
            .await;

        mock.assert_async().await;
        assert!(matches!(result, Err(ComLensError::GraphQL(_))));
    }

    #[tokio::test]
    async fn test_missing_organization_is_a_validation_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(json!({"data": {"organization": null}}).to_string())
            .create_async()
            .await;

        let client = GitHubClient::new(&server.url(), Token::from("test-token")).unwrap();
        let data: OrgData<PullRequestsRepo> = client
            .execute_graphql(queries::PULL_REQUESTS, json!({"org": "nope"}))
            .await
            .unwrap();

        assert!(matches!(data.into_page(), Err(ComLensError::Validation(_))));
    }

    // One transient 500, then a healthy 200 on the retry. The healthy mock is
    // swapped in while the client sits out its 5s delay, so this test takes
    // about five seconds.
    #[tokio::test]
    async fn test_transient_http_error_recovers_on_retry() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/graphql")
            .with_status(500)
            .with_body("upstream hiccup")
            .expect(1)
            .create_async()
            .await;

        let url = server.url();
        let handle = tokio::spawn(async move {
            let client = GitHubClient::new(&url, Token::from("test-token")).unwrap();
            client
                .execute_graphql::<OrgData<PullRequestsRepo>>(
                    queries::PULL_REQUESTS,
                    json!({"org": "w3b3d3v"}),
                )
                .await
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        failing.assert_async().await;
        failing.remove_async().await;
        let healthy = server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(page_body("repo-a", &["alice"], None))
            .expect(1)
            .create_async()
            .await;

        let data = handle.await.unwrap().unwrap();
        healthy.assert_async().await;

        let (repos, page_info) = data.into_page().unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].name, "repo-a");
        assert!(!page_info.has_next_page);
    }

    // Exercises the full retry budget, so it sleeps twice for 5s.
    #[tokio::test]
    async fn test_http_errors_exhaust_retries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/graphql")
            .with_status(500)
            .with_body("upstream broke")
            .expect(3)
            .create_async()
            .await;

        let client = GitHubClient::new(&server.url(), Token::from("test-token")).unwrap();
        let result: Result<OrgData<PullRequestsRepo>> = client
            .execute_graphql(queries::PULL_REQUESTS, json!({"org": "w3b3d3v"}))
            .await;

        mock.assert_async().await;
        assert!(matches!(
            result,
            Err(ComLensError::ApiAfterRetries { status: 500, attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn test_fetch_org_repos_single_page() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/orgs/w3b3d3v/repos")
            .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_body(
                json!([
                    {"name": "web3dev", "stargazers_count": 42, "forks_count": 7, "open_issues_count": 3},
                    {"name": "bootcamp", "stargazers_count": 11, "forks_count": 2, "open_issues_count": 0}
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let client = GitHubClient::new(&server.url(), Token::from("test-token")).unwrap();
        let repos = client.fetch_org_repos("w3b3d3v").await.unwrap();

        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].name, "web3dev");
        assert_eq!(repos[0].stargazers_count, 42);
    }

    #[tokio::test]
    async fn test_fetch_org_repos_non_success_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/orgs/w3b3d3v/repos")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body("Not Found")
            .create_async()
            .await;

        let client = GitHubClient::new(&server.url(), Token::from("test-token")).unwrap();
        let result = client.fetch_org_repos("w3b3d3v").await;

        assert!(matches!(result, Err(ComLensError::Api { status: 404, .. })));
    }
}
