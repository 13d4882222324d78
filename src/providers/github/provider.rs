use log::info;

use crate::auth::Token;
use crate::error::Result;

use super::client::GitHubClient;
use super::metrics::{self, GitHubMetric, MetricReport};

/// Provider for collecting contribution metrics from a GitHub organization.
pub struct GitHubProvider {
    client: GitHubClient,
    org: String,
}

impl GitHubProvider {
    pub fn new(base_url: &str, org: String, token: Token) -> Result<Self> {
        let client = GitHubClient::new(base_url, token)?;
        Ok(Self { client, org })
    }

    /// Run one metric end to end: paginate through the source, aggregate the
    /// records, and return the destination tables ready for upsert.
    pub async fn collect(&self, metric: GitHubMetric) -> Result<MetricReport> {
        info!(
            "Collecting {} for organization: {}",
            metric.label(),
            self.org
        );

        let report = metrics::collect(&self.client, &self.org, metric).await?;

        info!(
            "Fetched {} repository records into {} tables",
            report.records,
            report.tables.len()
        );

        Ok(report)
    }
}
