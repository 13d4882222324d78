mod client;
mod metrics;
mod provider;
mod queries;

pub use client::GitHubClient;
pub use metrics::{GitHubMetric, MetricReport};
pub use provider::GitHubProvider;
