//! Guild role census: one dated row per role with its member count.

use chrono::Utc;
use log::info;
use rusqlite::types::Value;

use crate::auth::Token;
use crate::error::Result;
use crate::store::{Column, TableData, TableSpec};

use super::client::{DiscordClient, GuildMember, GuildRole};

pub const ROLES_INFO: TableSpec = TableSpec {
    name: "roles_info",
    columns: &[
        Column { name: "role_name", sql_type: "TEXT" },
        Column { name: "role_id", sql_type: "INTEGER" },
        Column { name: "member_count", sql_type: "INTEGER" },
        Column { name: "date", sql_type: "TEXT" },
    ],
    key: &["role_id", "date"],
};

/// Count members holding each role. The `@everyone` role shares its id with
/// the guild and is not listed on members, so it counts everyone.
fn count_members(guild_id: &str, roles: &[GuildRole], members: &[GuildMember]) -> Vec<(GuildRole, i64)> {
    roles
        .iter()
        .map(|role| {
            let count = if role.id.to_string() == guild_id {
                members.len() as i64
            } else {
                let role_id = role.id.to_string();
                members
                    .iter()
                    .filter(|member| member.roles.iter().any(|id| *id == role_id))
                    .count() as i64
            };
            (role.clone(), count)
        })
        .collect()
}

/// Fetch roles and members, then build today's census rows.
pub async fn collect(
    client: &DiscordClient,
    guild_id: &str,
    bot_token: &Token,
) -> Result<(usize, TableData)> {
    let roles = client.fetch_roles(guild_id, bot_token).await?;
    let members = client.fetch_members(guild_id, bot_token).await?;
    info!("Fetched {} roles across {} members", roles.len(), members.len());

    let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
    let records = members.len();

    let rows = count_members(guild_id, &roles, &members)
        .into_iter()
        .map(|(role, count)| {
            vec![
                Value::Text(role.name),
                Value::Integer(role.id),
                Value::Integer(count),
                Value::Text(today.clone()),
            ]
        })
        .collect();

    Ok((records, TableData { spec: ROLES_INFO, rows }))
}
