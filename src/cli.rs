use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use std::path::PathBuf;

use crate::auth::Token;
use crate::config::Config;
use crate::output::{self, RunProgress};
use crate::providers::discord::{engagement, roles, DiscordClient, SessionHeaders};
use crate::providers::github::{GitHubMetric, GitHubProvider};
use crate::store::{SqliteStore, TableData};

#[derive(Parser)]
#[command(name = "comlens")]
#[command(author, version, about = "Community Insights Tool", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to ./comlens.{toml,json,yaml,yml})
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path; overrides the config file. When neither is set,
    /// results are printed instead of stored.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Also print the aggregated tables to stdout
    #[arg(short, long, global = true, default_value_t = false)]
    print: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect contribution metrics from a GitHub organization
    Github {
        #[arg(value_enum)]
        metric: GitHubMetricArg,

        /// Organization login
        #[arg(short, long)]
        org: Option<String>,

        /// Personal access token
        #[arg(short, long, env = "GITHUB_TOKEN")]
        token: Option<String>,
    },

    /// Collect engagement metrics from a Discord guild
    Discord {
        #[command(subcommand)]
        command: DiscordCommands,
    },
}

#[derive(Subcommand)]
enum DiscordCommands {
    /// Channel engagement time series (fetches only days newer than stored)
    Engagement {
        /// Guild (server) id
        #[arg(short, long)]
        guild_id: Option<String>,

        /// Session Authorization header value
        #[arg(long, env = "DISCORD_AUTHORIZATION")]
        authorization: Option<String>,

        /// Session Cookie header value
        #[arg(long, env = "DISCORD_COOKIE")]
        cookie: Option<String>,

        /// Session X-Track header value
        #[arg(long, env = "DISCORD_X_TRACK")]
        x_track: Option<String>,
    },

    /// Member count per guild role (daily census)
    Roles {
        /// Guild (server) id
        #[arg(short, long)]
        guild_id: Option<String>,

        /// Bot token
        #[arg(long, env = "DISCORD_BOT_TOKEN")]
        bot_token: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GitHubMetricArg {
    Repos,
    Stars,
    Forks,
    Issues,
    PullRequests,
    CodeLines,
    TimeToClose,
    All,
}

impl GitHubMetricArg {
    fn metrics(self) -> Vec<GitHubMetric> {
        match self {
            GitHubMetricArg::Repos => vec![GitHubMetric::Repos],
            GitHubMetricArg::Stars => vec![GitHubMetric::Stars],
            GitHubMetricArg::Forks => vec![GitHubMetric::Forks],
            GitHubMetricArg::Issues => vec![GitHubMetric::Issues],
            GitHubMetricArg::PullRequests => vec![GitHubMetric::PullRequests],
            GitHubMetricArg::CodeLines => vec![GitHubMetric::CodeLines],
            GitHubMetricArg::TimeToClose => vec![GitHubMetric::TimeToClose],
            GitHubMetricArg::All => GitHubMetric::ALL.to_vec(),
        }
    }
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;

        match &self.command {
            Commands::Github { metric, org, token } => {
                self.execute_github(&config, *metric, org, token).await
            }
            Commands::Discord { command } => match command {
                DiscordCommands::Engagement {
                    guild_id,
                    authorization,
                    cookie,
                    x_track,
                } => {
                    self.execute_discord_engagement(
                        &config,
                        guild_id,
                        authorization,
                        cookie,
                        x_track,
                    )
                    .await
                }
                DiscordCommands::Roles { guild_id, bot_token } => {
                    self.execute_discord_roles(&config, guild_id, bot_token).await
                }
            },
        }
    }

    async fn execute_github(
        &self,
        config: &Config,
        metric: GitHubMetricArg,
        org: &Option<String>,
        token: &Option<String>,
    ) -> Result<()> {
        let org = match org.clone().or_else(|| config.github.org.clone()) {
            Some(org) => org,
            None => bail!("GitHub organization is required (--org or config [github] org)"),
        };
        let token = match token.clone().or_else(|| config.github.token.clone()) {
            Some(token) => Token::from(token),
            None => bail!("GitHub token is required (--token, GITHUB_TOKEN or config [github] token)"),
        };

        let provider = GitHubProvider::new(&config.github.base_url, org, token)?;
        let mut store = self.open_store(config)?;

        for metric in metric.metrics() {
            let progress = RunProgress::start_fetch(metric.label());
            let report = provider.collect(metric).await?;

            let progress = progress.finish_fetch_start_aggregate(report.records);
            let row_total: usize = report.tables.iter().map(|t| t.rows.len()).sum();

            let progress = progress.finish_aggregate_start_write(row_total);
            self.deliver(&mut store, &report.tables)?;
            if store.is_some() {
                progress.finish_write(report.tables.len());
            } else {
                progress.finish_print_only();
            }
        }

        Ok(())
    }

    async fn execute_discord_engagement(
        &self,
        config: &Config,
        guild_id: &Option<String>,
        authorization: &Option<String>,
        cookie: &Option<String>,
        x_track: &Option<String>,
    ) -> Result<()> {
        let guild_id = match guild_id.clone().or_else(|| config.discord.guild_id.clone()) {
            Some(id) => id,
            None => bail!("Discord guild id is required (--guild-id or config [discord] guild-id)"),
        };
        let session = SessionHeaders {
            authorization: required(authorization, &config.discord.authorization, "authorization")?,
            cookie: required(cookie, &config.discord.cookie, "cookie")?,
            x_track: required(x_track, &config.discord.x_track, "x-track")?,
        };

        let client = DiscordClient::new(&config.discord.base_url)?;
        let mut store = self.open_store(config)?;

        // The one stateful cross-run read: resume after the latest stored day.
        let latest = store
            .as_ref()
            .map(|s| s.latest_date(engagement::CHANNELS_ENGAGEMENT.name, "date"))
            .transpose()?
            .flatten();

        let progress = RunProgress::start_fetch("channel engagement");
        let (records, table) = engagement::collect(&client, &guild_id, &session, latest).await?;

        let progress = progress.finish_fetch_start_aggregate(records);
        let progress = progress.finish_aggregate_start_write(table.rows.len());

        self.deliver(&mut store, std::slice::from_ref(&table))?;
        if store.is_some() {
            progress.finish_write(1);
        } else {
            progress.finish_print_only();
        }

        Ok(())
    }

    async fn execute_discord_roles(
        &self,
        config: &Config,
        guild_id: &Option<String>,
        bot_token: &Option<String>,
    ) -> Result<()> {
        let guild_id = match guild_id.clone().or_else(|| config.discord.guild_id.clone()) {
            Some(id) => id,
            None => bail!("Discord guild id is required (--guild-id or config [discord] guild-id)"),
        };
        let bot_token = match bot_token.clone().or_else(|| config.discord.bot_token.clone()) {
            Some(token) => Token::from(token),
            None => bail!("Discord bot token is required (--bot-token, DISCORD_BOT_TOKEN or config [discord] bot-token)"),
        };

        let client = DiscordClient::new(&config.discord.base_url)?;
        let mut store = self.open_store(config)?;

        let progress = RunProgress::start_fetch("guild roles");
        let (records, table) = roles::collect(&client, &guild_id, &bot_token).await?;

        let progress = progress.finish_fetch_start_aggregate(records);
        let progress = progress.finish_aggregate_start_write(table.rows.len());

        self.deliver(&mut store, std::slice::from_ref(&table))?;
        if store.is_some() {
            progress.finish_write(1);
        } else {
            progress.finish_print_only();
        }

        Ok(())
    }

    fn open_store(&self, config: &Config) -> Result<Option<SqliteStore>> {
        let path = self
            .db
            .clone()
            .or_else(|| config.storage.db_path.as_ref().map(PathBuf::from));

        match path {
            Some(path) => Ok(Some(SqliteStore::open(&path)?)),
            None => {
                info!("No database configured; results will be printed");
                Ok(None)
            }
        }
    }

    fn deliver(&self, store: &mut Option<SqliteStore>, tables: &[TableData]) -> Result<()> {
        if let Some(store) = store {
            for table in tables {
                let written = store.write(&table.spec, &table.rows)?;
                info!("Upserted {written} rows into {}", table.spec.name);
            }
        }

        if self.print || store.is_none() {
            for table in tables {
                output::print_table(table);
            }
        }

        Ok(())
    }
}

fn required(flag: &Option<String>, config_value: &Option<String>, name: &str) -> Result<String> {
    match flag.clone().or_else(|| config_value.clone()) {
        Some(value) => Ok(value),
        None => bail!("Discord session {name} is required (flag, env or config [discord])"),
    }
}
