//! GraphQL documents and response shapes for the organization metrics.
//!
//! Every document pages through `repositories(first: 100, after: $cursor)`
//! and reads `pageInfo { hasNextPage endCursor }`; only the per-repository
//! selection differs between metrics.

use serde::Deserialize;

use super::client::PageInfo;
use crate::error::{ComLensError, Result};

pub const STARS: &str = r#"
query Stars($org: String!, $cursor: String) {
  organization(login: $org) {
    repositories(first: 100, after: $cursor) {
      nodes {
        name
        stargazerCount
        stargazers(first: 100) {
          nodes { login }
        }
      }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#;

pub const FORKS: &str = r#"
query Forks($org: String!, $cursor: String) {
  organization(login: $org) {
    repositories(first: 100, after: $cursor) {
      nodes {
        name
        forks(first: 100) {
          totalCount
          nodes {
            owner { login }
          }
        }
      }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#;

pub const ISSUES: &str = r#"
query Issues($org: String!, $cursor: String) {
  organization(login: $org) {
    repositories(first: 100, after: $cursor) {
      nodes {
        name
        issues(first: 100) {
          totalCount
          nodes {
            author { login }
          }
        }
      }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#;

pub const PULL_REQUESTS: &str = r#"
query PullRequests($org: String!, $cursor: String) {
  organization(login: $org) {
    repositories(first: 100, after: $cursor) {
      nodes {
        name
        pullRequests(states: [MERGED], first: 100) {
          nodes {
            author { login }
          }
        }
      }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#;

pub const CODE_LINES: &str = r#"
query CodeLines($org: String!, $cursor: String) {
  organization(login: $org) {
    repositories(first: 100, after: $cursor) {
      nodes {
        name
        pullRequests(states: [MERGED], first: 50) {
          nodes {
            additions
            deletions
            author { login }
          }
        }
      }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#;

pub const TIME_TO_CLOSE: &str = r#"
query TimeToClose($org: String!, $cursor: String) {
  organization(login: $org) {
    repositories(first: 100, after: $cursor) {
      nodes {
        name
        issues(states: [CLOSED], first: 100) {
          nodes {
            createdAt
            closedAt
            assignees(first: 10) {
              nodes { login }
            }
          }
        }
      }
      pageInfo { hasNextPage endCursor }
    }
  }
}"#;

// Response envelope, generic over the per-metric repository node.

#[derive(Debug, Deserialize)]
pub struct OrgData<R> {
    pub organization: Option<OrgRepositories<R>>,
}

#[derive(Debug, Deserialize)]
pub struct OrgRepositories<R> {
    pub repositories: RepositoryConnection<R>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConnection<R> {
    pub nodes: Vec<R>,
    pub page_info: PageInfoNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfoNode {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

impl<R> OrgData<R> {
    /// Unwrap the organization envelope into repository nodes plus page info.
    pub fn into_page(self) -> Result<(Vec<R>, PageInfo)> {
        let org = self.organization.ok_or_else(|| {
            ComLensError::Validation("organization not found in the response".to_string())
        })?;
        let connection = org.repositories;
        Ok((
            connection.nodes,
            PageInfo {
                has_next_page: connection.page_info.has_next_page,
                end_cursor: connection.page_info.end_cursor,
            },
        ))
    }
}

// Per-metric repository nodes.

#[derive(Debug, Deserialize)]
pub struct Login {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct NodeList<T> {
    pub nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarsRepo {
    pub name: String,
    pub stargazer_count: i64,
    pub stargazers: NodeList<Login>,
}

#[derive(Debug, Deserialize)]
pub struct ForksRepo {
    pub name: String,
    pub forks: ForkConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkConnection {
    pub total_count: i64,
    pub nodes: Vec<Fork>,
}

#[derive(Debug, Deserialize)]
pub struct Fork {
    pub owner: Option<Login>,
}

#[derive(Debug, Deserialize)]
pub struct IssuesRepo {
    pub name: String,
    pub issues: IssueConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueConnection {
    pub total_count: i64,
    pub nodes: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
pub struct Issue {
    pub author: Option<Login>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestsRepo {
    pub name: String,
    pub pull_requests: NodeList<PullRequest>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequest {
    pub author: Option<Login>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeLinesRepo {
    pub name: String,
    pub pull_requests: NodeList<PullRequestLines>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestLines {
    pub additions: i64,
    pub deletions: i64,
    pub author: Option<Login>,
}

#[derive(Debug, Deserialize)]
pub struct TimeToCloseRepo {
    pub name: String,
    pub issues: NodeList<ClosedIssue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedIssue {
    pub created_at: String,
    pub closed_at: Option<String>,
    pub assignees: NodeList<Login>,
}
