//! Channel engagement collector.
//!
//! This is the one time-series pipeline: instead of refetching history it
//! reads the most recent stored date and only requests the window from the
//! day after up to today. Duplicate (channel, date) observations from
//! overlapping fetch windows are resolved by keeping the row with the most
//! participators, matching the historical cleanup rule. The rest of the
//! pipelines aggregate by strict sum/count; this max-wins rule is deliberate
//! and stays local to this module.

use chrono::{Days, NaiveDate, Utc};
use log::{info, warn};
use rusqlite::types::Value;

use crate::error::Result;
use crate::store::{Column, TableData, TableSpec};

use super::client::{DiscordClient, EngagementEntry, SessionHeaders};

pub const CHANNELS_ENGAGEMENT: TableSpec = TableSpec {
    name: "channels_engagement",
    columns: &[
        Column { name: "channel_name", sql_type: "TEXT" },
        Column { name: "date", sql_type: "TEXT" },
        Column { name: "channel_id", sql_type: "INTEGER" },
        Column { name: "participators", sql_type: "INTEGER" },
        Column { name: "communicators", sql_type: "INTEGER" },
        Column { name: "messages_sent", sql_type: "REAL" },
        Column { name: "pct_participated_in_channel", sql_type: "REAL" },
        Column { name: "pct_communicated_in_channel", sql_type: "REAL" },
        Column { name: "kind", sql_type: "TEXT" },
    ],
    key: &["channel_name", "date"],
};

/// One cleaned channel-day observation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDay {
    pub channel_name: String,
    pub date: NaiveDate,
    pub channel_id: i64,
    pub participators: i64,
    pub communicators: i64,
    pub messages_sent: f64,
    pub pct_participated: f64,
    pub pct_communicated: f64,
    pub kind: String,
}

/// Window start when the destination holds no engagement data yet.
pub fn default_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 1).expect("valid epoch date")
}

/// First day of the next fetch window: the day after the latest stored date,
/// or the default epoch for an empty destination.
pub fn window_start(latest_stored: Option<NaiveDate>) -> NaiveDate {
    match latest_stored {
        Some(date) => date + Days::new(1),
        None => default_epoch(),
    }
}

/// Strip apostrophes and keep only the text after a `•` or `・` separator,
/// the convention used for decorated channel names.
pub fn clean_channel_name(raw: &str) -> String {
    let cleaned = raw.replace('\'', "");
    match cleaned.find(['•', '・']) {
        Some(pos) => {
            let sep_len = cleaned[pos..].chars().next().map_or(0, char::len_utf8);
            cleaned[pos + sep_len..].to_string()
        }
        None => cleaned,
    }
}

/// Flatten raw entries into cleaned channel-day rows. Entries without a
/// usable channel name or date are dropped.
fn build_rows(entries: Vec<(EngagementEntry, &str)>) -> Vec<ChannelDay> {
    let mut rows = Vec::new();

    for (entry, kind) in entries {
        let name = entry.channel_name.as_deref().unwrap_or("Unknown");
        let name = clean_channel_name(name);
        if name == "Unknown" {
            continue;
        }

        let date_part = entry
            .interval_start_timestamp
            .get(..10)
            .unwrap_or(&entry.interval_start_timestamp);
        let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
            warn!(
                "Skipping engagement row with unparseable timestamp: {}",
                entry.interval_start_timestamp
            );
            continue;
        };

        rows.push(ChannelDay {
            channel_name: name,
            date,
            channel_id: entry.channel_id,
            participators: entry.participators,
            communicators: entry.communicators,
            messages_sent: entry.messages_sent,
            pct_participated: entry.pct_participated_in_channel,
            pct_communicated: entry.pct_communicated_in_channel,
            kind: kind.to_string(),
        });
    }

    rows
}

/// Resolve duplicate (channel, date) pairs by keeping the observation with
/// the most participators. Output is sorted by channel name then date.
pub fn dedup_max_wins(mut rows: Vec<ChannelDay>) -> Vec<ChannelDay> {
    rows.sort_by(|a, b| {
        a.channel_name
            .cmp(&b.channel_name)
            .then(a.date.cmp(&b.date))
            .then(b.participators.cmp(&a.participators))
    });
    rows.dedup_by(|next, kept| {
        kept.channel_name == next.channel_name && kept.date == next.date
    });
    rows
}

fn table(rows: Vec<ChannelDay>) -> TableData {
    let rows = rows
        .into_iter()
        .map(|row| {
            vec![
                Value::Text(row.channel_name),
                Value::Text(row.date.format("%Y-%m-%d").to_string()),
                Value::Integer(row.channel_id),
                Value::Integer(row.participators),
                Value::Integer(row.communicators),
                Value::Real(row.messages_sent),
                Value::Real(row.pct_participated),
                Value::Real(row.pct_communicated),
                Value::Text(row.kind),
            ]
        })
        .collect();

    TableData { spec: CHANNELS_ENGAGEMENT, rows }
}

/// Fetch, clean and dedup the engagement window `[start, today]` for both
/// channel kinds. Returns the raw record count alongside the table.
pub async fn collect(
    client: &DiscordClient,
    guild_id: &str,
    session: &SessionHeaders,
    latest_stored: Option<NaiveDate>,
) -> Result<(usize, TableData)> {
    let start = window_start(latest_stored);
    let end = Utc::now().date_naive();
    info!("Fetching channel engagement window {start} to {end}");

    let mut entries = Vec::new();
    for kind in ["text", "voice"] {
        let page = client
            .fetch_engagement(guild_id, kind, start, end, session)
            .await?;
        entries.extend(page.into_iter().map(|entry| (entry, kind)));
    }

    let records = entries.len();
    let rows = dedup_max_wins(build_rows(entries));

    Ok((records, table(rows)))
}
