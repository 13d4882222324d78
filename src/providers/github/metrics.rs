//! The GitHub metric catalog: each metric pairs a GraphQL document with the
//! extraction and aggregation rules that turn its pages into destination
//! tables.

use chrono::DateTime;
use log::warn;
use rusqlite::types::Value;
use serde_json::json;

use crate::aggregate::{self, AggregateRow};
use crate::error::Result;
use crate::store::{Column, TableData, TableSpec};

use super::client::{GitHubClient, OrgRepo};
use super::queries::{
    self, CodeLinesRepo, ForksRepo, IssuesRepo, OrgData, PullRequestsRepo, StarsRepo,
    TimeToCloseRepo,
};

const UNKNOWN_LOGIN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubMetric {
    Repos,
    Stars,
    Forks,
    Issues,
    PullRequests,
    CodeLines,
    TimeToClose,
}

impl GitHubMetric {
    pub const ALL: [GitHubMetric; 7] = [
        GitHubMetric::Repos,
        GitHubMetric::Stars,
        GitHubMetric::Forks,
        GitHubMetric::Issues,
        GitHubMetric::PullRequests,
        GitHubMetric::CodeLines,
        GitHubMetric::TimeToClose,
    ];

    pub fn label(self) -> &'static str {
        match self {
            GitHubMetric::Repos => "organization repositories",
            GitHubMetric::Stars => "repository stars",
            GitHubMetric::Forks => "repository forks",
            GitHubMetric::Issues => "repository issues",
            GitHubMetric::PullRequests => "merged pull requests",
            GitHubMetric::CodeLines => "changed code lines",
            GitHubMetric::TimeToClose => "issue time-to-close",
        }
    }
}

/// Result of one metric run: how many repository records were fetched, and
/// the destination tables built from them.
pub struct MetricReport {
    pub records: usize,
    pub tables: Vec<TableData>,
}

pub async fn collect(
    client: &GitHubClient,
    org: &str,
    metric: GitHubMetric,
) -> Result<MetricReport> {
    let variables = json!({ "org": org });

    match metric {
        GitHubMetric::Repos => {
            let repos = client.fetch_org_repos(org).await?;
            Ok(MetricReport {
                records: repos.len(),
                tables: vec![repos_table(repos)],
            })
        }
        GitHubMetric::Stars => {
            let repos: Vec<StarsRepo> = client
                .fetch_paginated(queries::STARS, variables, OrgData::into_page)
                .await?;
            Ok(MetricReport {
                records: repos.len(),
                tables: stars_tables(repos),
            })
        }
        GitHubMetric::Forks => {
            let repos: Vec<ForksRepo> = client
                .fetch_paginated(queries::FORKS, variables, OrgData::into_page)
                .await?;
            Ok(MetricReport {
                records: repos.len(),
                tables: forks_tables(repos),
            })
        }
        GitHubMetric::Issues => {
            let repos: Vec<IssuesRepo> = client
                .fetch_paginated(queries::ISSUES, variables, OrgData::into_page)
                .await?;
            Ok(MetricReport {
                records: repos.len(),
                tables: issues_tables(repos),
            })
        }
        GitHubMetric::PullRequests => {
            let repos: Vec<PullRequestsRepo> = client
                .fetch_paginated(queries::PULL_REQUESTS, variables, OrgData::into_page)
                .await?;
            Ok(MetricReport {
                records: repos.len(),
                tables: pull_requests_tables(repos),
            })
        }
        GitHubMetric::CodeLines => {
            let repos: Vec<CodeLinesRepo> = client
                .fetch_paginated(queries::CODE_LINES, variables, OrgData::into_page)
                .await?;
            Ok(MetricReport {
                records: repos.len(),
                tables: code_lines_tables(repos),
            })
        }
        GitHubMetric::TimeToClose => {
            let repos: Vec<TimeToCloseRepo> = client
                .fetch_paginated(queries::TIME_TO_CLOSE, variables, OrgData::into_page)
                .await?;
            Ok(MetricReport {
                records: repos.len(),
                tables: vec![time_to_close_table(repos)],
            })
        }
    }
}

// Table schemas (mirroring the historical script outputs).

const ORG_REPOS: TableSpec = TableSpec {
    name: "org_repos",
    columns: &[
        Column { name: "repo_name", sql_type: "TEXT" },
        Column { name: "stars_count", sql_type: "INTEGER" },
        Column { name: "forks_count", sql_type: "INTEGER" },
        Column { name: "open_issues_count", sql_type: "INTEGER" },
    ],
    key: &["repo_name"],
};

const REPO_STARS: TableSpec = TableSpec {
    name: "repo_stars",
    columns: &[
        Column { name: "repo_name", sql_type: "TEXT" },
        Column { name: "stars_count", sql_type: "INTEGER" },
    ],
    key: &["repo_name"],
};

const USER_STARS: TableSpec = TableSpec {
    name: "user_stars",
    columns: &[
        Column { name: "user", sql_type: "TEXT" },
        Column { name: "repositories_starred_count", sql_type: "INTEGER" },
    ],
    key: &["user"],
};

const REPO_FORKS: TableSpec = TableSpec {
    name: "repo_forks",
    columns: &[
        Column { name: "repo_name", sql_type: "TEXT" },
        Column { name: "forks_count", sql_type: "INTEGER" },
    ],
    key: &["repo_name"],
};

const USER_FORKS: TableSpec = TableSpec {
    name: "user_forks",
    columns: &[
        Column { name: "user", sql_type: "TEXT" },
        Column { name: "forks_count", sql_type: "INTEGER" },
    ],
    key: &["user"],
};

const REPO_ISSUES: TableSpec = TableSpec {
    name: "repo_issues",
    columns: &[
        Column { name: "repo_name", sql_type: "TEXT" },
        Column { name: "issues_count", sql_type: "INTEGER" },
    ],
    key: &["repo_name"],
};

const USER_ISSUES: TableSpec = TableSpec {
    name: "user_issues",
    columns: &[
        Column { name: "user", sql_type: "TEXT" },
        Column { name: "issues_count", sql_type: "INTEGER" },
    ],
    key: &["user"],
};

const REPO_PULL_REQUESTS: TableSpec = TableSpec {
    name: "repo_pull_requests",
    columns: &[
        Column { name: "repo_name", sql_type: "TEXT" },
        Column { name: "merged_pull_requests_count", sql_type: "INTEGER" },
    ],
    key: &["repo_name"],
};

const USER_PULL_REQUESTS: TableSpec = TableSpec {
    name: "user_pull_requests",
    columns: &[
        Column { name: "user", sql_type: "TEXT" },
        Column { name: "merged_pull_requests_count", sql_type: "INTEGER" },
    ],
    key: &["user"],
};

const REPO_CODE_LINES: TableSpec = TableSpec {
    name: "repo_code_lines",
    columns: &[
        Column { name: "repo_name", sql_type: "TEXT" },
        Column { name: "total_lines_changed", sql_type: "INTEGER" },
    ],
    key: &["repo_name"],
};

const USER_CODE_LINES: TableSpec = TableSpec {
    name: "user_code_lines",
    columns: &[
        Column { name: "user", sql_type: "TEXT" },
        Column { name: "total_lines_changed", sql_type: "INTEGER" },
    ],
    key: &["user"],
};

const TIME_TO_CLOSE: TableSpec = TableSpec {
    name: "time_to_close",
    columns: &[
        Column { name: "user", sql_type: "TEXT" },
        Column { name: "average_time_to_close_days", sql_type: "REAL" },
    ],
    key: &["user"],
};

// Extraction and aggregation, one pure function per metric.

fn repos_table(repos: Vec<OrgRepo>) -> TableData {
    let rows = repos
        .into_iter()
        .map(|repo| {
            vec![
                Value::Text(repo.name),
                Value::Integer(repo.stargazers_count),
                Value::Integer(repo.forks_count),
                Value::Integer(repo.open_issues_count),
            ]
        })
        .collect();

    TableData { spec: ORG_REPOS, rows }
}

fn stars_tables(repos: Vec<StarsRepo>) -> Vec<TableData> {
    let repo_rows = aggregate::sum_by(&repos, |r| &r.name, |r| r.stargazer_count as f64);

    let logins: Vec<String> = repos
        .iter()
        .flat_map(|r| r.stargazers.nodes.iter().map(|u| u.login.clone()))
        .collect();
    let user_rows = aggregate::count_by(&logins, |l| l.as_str());

    vec![
        TableData { spec: REPO_STARS, rows: integer_rows(repo_rows) },
        TableData { spec: USER_STARS, rows: integer_rows(user_rows) },
    ]
}

fn forks_tables(repos: Vec<ForksRepo>) -> Vec<TableData> {
    let repo_rows = aggregate::sum_by(&repos, |r| &r.name, |r| r.forks.total_count as f64);

    let owners: Vec<String> = repos
        .iter()
        .flat_map(|r| r.forks.nodes.iter())
        .map(|fork| {
            fork.owner
                .as_ref()
                .map(|o| o.login.clone())
                .unwrap_or_else(|| UNKNOWN_LOGIN.to_string())
        })
        .collect();
    let user_rows = aggregate::count_by(&owners, |o| o.as_str());

    vec![
        TableData { spec: REPO_FORKS, rows: integer_rows(repo_rows) },
        TableData { spec: USER_FORKS, rows: integer_rows(user_rows) },
    ]
}

fn issues_tables(repos: Vec<IssuesRepo>) -> Vec<TableData> {
    let repo_rows = aggregate::sum_by(&repos, |r| &r.name, |r| r.issues.total_count as f64);

    let authors: Vec<String> = repos
        .iter()
        .flat_map(|r| r.issues.nodes.iter())
        .map(|issue| {
            issue
                .author
                .as_ref()
                .map(|a| a.login.clone())
                .unwrap_or_else(|| UNKNOWN_LOGIN.to_string())
        })
        .collect();
    let user_rows = aggregate::count_by(&authors, |a| a.as_str());

    vec![
        TableData { spec: REPO_ISSUES, rows: integer_rows(repo_rows) },
        TableData { spec: USER_ISSUES, rows: integer_rows(user_rows) },
    ]
}

fn pull_requests_tables(repos: Vec<PullRequestsRepo>) -> Vec<TableData> {
    let repo_rows = aggregate::sum_by(&repos, |r| &r.name, |r| r.pull_requests.nodes.len() as f64);

    let authors: Vec<String> = repos
        .iter()
        .flat_map(|r| r.pull_requests.nodes.iter())
        .map(|pr| {
            pr.author
                .as_ref()
                .map(|a| a.login.clone())
                .unwrap_or_else(|| UNKNOWN_LOGIN.to_string())
        })
        .collect();
    let user_rows = aggregate::count_by(&authors, |a| a.as_str());

    vec![
        TableData { spec: REPO_PULL_REQUESTS, rows: integer_rows(repo_rows) },
        TableData { spec: USER_PULL_REQUESTS, rows: integer_rows(user_rows) },
    ]
}

fn code_lines_tables(repos: Vec<CodeLinesRepo>) -> Vec<TableData> {
    struct Changed {
        repo: String,
        author: String,
        lines: i64,
    }

    let changes: Vec<Changed> = repos
        .iter()
        .flat_map(|repo| {
            repo.pull_requests.nodes.iter().map(|pr| Changed {
                repo: repo.name.clone(),
                author: pr
                    .author
                    .as_ref()
                    .map(|a| a.login.clone())
                    .unwrap_or_else(|| UNKNOWN_LOGIN.to_string()),
                lines: pr.additions + pr.deletions,
            })
        })
        .collect();

    let repo_rows = aggregate::sum_by(&changes, |c| &c.repo, |c| c.lines as f64);
    let user_rows = aggregate::sum_by(&changes, |c| &c.author, |c| c.lines as f64);

    vec![
        TableData { spec: REPO_CODE_LINES, rows: integer_rows(repo_rows) },
        TableData { spec: USER_CODE_LINES, rows: integer_rows(user_rows) },
    ]
}

fn time_to_close_table(repos: Vec<TimeToCloseRepo>) -> TableData {
    struct Closure {
        assignee: String,
        days: f64,
    }

    let mut closures = Vec::new();
    for repo in &repos {
        for issue in &repo.issues.nodes {
            let Some(closed_at) = &issue.closed_at else {
                continue;
            };
            let Some(days) = days_between(&issue.created_at, closed_at) else {
                warn!(
                    "Skipping issue in {} with unparseable timestamps: {} / {}",
                    repo.name, issue.created_at, closed_at
                );
                continue;
            };
            for assignee in &issue.assignees.nodes {
                closures.push(Closure {
                    assignee: assignee.login.clone(),
                    days,
                });
            }
        }
    }

    let rows = aggregate::mean_by(&closures, |c| &c.assignee, |c| c.days);
    TableData { spec: TIME_TO_CLOSE, rows: real_rows(rows) }
}

fn days_between(created_at: &str, closed_at: &str) -> Option<f64> {
    let created = DateTime::parse_from_rfc3339(created_at).ok()?;
    let closed = DateTime::parse_from_rfc3339(closed_at).ok()?;
    Some((closed - created).num_days() as f64)
}

fn integer_rows(rows: Vec<AggregateRow>) -> Vec<Vec<Value>> {
    rows.into_iter()
        .map(|row| vec![Value::Text(row.key), Value::Integer(row.value as i64)])
        .collect()
}

fn real_rows(rows: Vec<AggregateRow>) -> Vec<Vec<Value>> {
    rows.into_iter()
        .map(|row| vec![Value::Text(row.key), Value::Real(row.value)])
        .collect()
}
