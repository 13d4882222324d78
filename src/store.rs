use std::path::Path;

use chrono::NaiveDate;
use log::{debug, info};
use rusqlite::types::Value;
use rusqlite::Connection;

use crate::error::{ComLensError, Result};

/// A destination column: name plus SQLite storage type.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static str,
}

/// Schema for one destination table. `key` names the natural-key columns that
/// form the primary key; upserts replace rows on key conflict.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub key: &'static [&'static str],
}

impl TableSpec {
    fn create_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.sql_type))
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
            self.name,
            columns.join(", "),
            self.key.join(", ")
        )
    }

    fn insert_sql(&self) -> String {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name).collect();
        let placeholders: Vec<String> = (1..=self.columns.len()).map(|i| format!("?{i}")).collect();

        format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            self.name,
            names.join(", "),
            placeholders.join(", ")
        )
    }
}

/// A destination table plus the aggregate rows bound for it, in
/// `spec.columns` order.
#[derive(Debug)]
pub struct TableData {
    pub spec: TableSpec,
    pub rows: Vec<Vec<Value>>,
}

/// SQLite-backed destination store.
///
/// Every write ensures the table exists, then upserts all rows in a single
/// transaction. Re-running a write with identical rows leaves the table in
/// the same final state.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database file at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        info!("Opened destination database: {}", path.display());
        Ok(Self { conn })
    }

    /// Upsert rows into the table described by `spec`.
    ///
    /// Rows must list values in `spec.columns` order. A failing row aborts
    /// the whole call; nothing from it is committed.
    ///
    /// Returns the number of rows written.
    pub fn write(&mut self, spec: &TableSpec, rows: &[Vec<Value>]) -> Result<usize> {
        self.conn.execute_batch(&spec.create_sql())?;

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&spec.insert_sql())?;
            for row in rows {
                stmt.execute(rusqlite::params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;

        debug!("Upserted {} rows into {}", rows.len(), spec.name);
        Ok(rows.len())
    }

    /// Read the most recent date persisted in `table.column`.
    ///
    /// Returns `None` when the table does not exist yet or holds no rows,
    /// so callers fall back to their default epoch.
    pub fn latest_date(&self, table: &str, column: &str) -> Result<Option<NaiveDate>> {
        let table_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        if table_count == 0 {
            return Ok(None);
        }

        let max: Option<String> = self.conn.query_row(
            &format!("SELECT MAX({column}) FROM {table}"),
            [],
            |row| row.get(0),
        )?;

        match max {
            Some(raw) => {
                // Dates are stored as ISO strings; tolerate a trailing
                // timestamp component.
                let date_part = raw.get(..10).unwrap_or(&raw);
                let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|e| {
                    ComLensError::Validation(format!("unparseable date '{raw}' in {table}: {e}"))
                })?;
                Ok(Some(date))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS: TableSpec = TableSpec {
        name: "user_pull_requests",
        columns: &[
            Column { name: "user", sql_type: "TEXT" },
            Column { name: "merged_pull_requests_count", sql_type: "INTEGER" },
        ],
        key: &["user"],
    };

    fn open_temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("insights.db")).unwrap();
        (dir, store)
    }

    fn user_row(user: &str, count: i64) -> Vec<Value> {
        vec![Value::Text(user.to_string()), Value::Integer(count)]
    }

    fn all_users(store: &SqliteStore) -> Vec<(String, i64)> {
        let mut stmt = store
            .conn
            .prepare("SELECT user, merged_pull_requests_count FROM user_pull_requests ORDER BY user")
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        rows.collect::<rusqlite::Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_write_creates_table_and_inserts() {
        let (_dir, mut store) = open_temp_store();

        let written = store
            .write(&USERS, &[user_row("alice", 2), user_row("bob", 2)])
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(all_users(&store), vec![("alice".into(), 2), ("bob".into(), 2)]);
    }

    #[test]
    fn test_write_is_idempotent() {
        let (_dir, mut store) = open_temp_store();
        let rows = vec![user_row("alice", 2), user_row("bob", 2)];

        store.write(&USERS, &rows).unwrap();
        let first = all_users(&store);

        store.write(&USERS, &rows).unwrap();
        assert_eq!(all_users(&store), first);
    }

    #[test]
    fn test_write_replaces_on_key_conflict() {
        let (_dir, mut store) = open_temp_store();

        store.write(&USERS, &[user_row("alice", 2)]).unwrap();
        store.write(&USERS, &[user_row("alice", 7)]).unwrap();

        assert_eq!(all_users(&store), vec![("alice".into(), 7)]);
    }

    #[test]
    fn test_composite_key_upsert() {
        const ENGAGEMENT: TableSpec = TableSpec {
            name: "channels_engagement",
            columns: &[
                Column { name: "channel_name", sql_type: "TEXT" },
                Column { name: "date", sql_type: "TEXT" },
                Column { name: "participators", sql_type: "INTEGER" },
            ],
            key: &["channel_name", "date"],
        };

        let (_dir, mut store) = open_temp_store();
        let row = |p: i64| {
            vec![
                Value::Text("general".into()),
                Value::Text("2024-01-01".into()),
                Value::Integer(p),
            ]
        };

        store.write(&ENGAGEMENT, &[row(10)]).unwrap();
        store.write(&ENGAGEMENT, &[row(15)]).unwrap();

        let count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM channels_engagement", [], |r| r.get(0))
            .unwrap();
        let participators: i64 = store
            .conn
            .query_row("SELECT participators FROM channels_engagement", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(participators, 15);
    }

    #[test]
    fn test_latest_date_missing_table() {
        let (_dir, store) = open_temp_store();
        assert_eq!(store.latest_date("channels_engagement", "date").unwrap(), None);
    }

    #[test]
    fn test_latest_date_empty_table() {
        const ENGAGEMENT: TableSpec = TableSpec {
            name: "channels_engagement",
            columns: &[
                Column { name: "channel_name", sql_type: "TEXT" },
                Column { name: "date", sql_type: "TEXT" },
            ],
            key: &["channel_name", "date"],
        };

        let (_dir, mut store) = open_temp_store();
        store.write(&ENGAGEMENT, &[]).unwrap();
        assert_eq!(store.latest_date("channels_engagement", "date").unwrap(), None);
    }

    #[test]
    fn test_latest_date_returns_max() {
        const ENGAGEMENT: TableSpec = TableSpec {
            name: "channels_engagement",
            columns: &[
                Column { name: "channel_name", sql_type: "TEXT" },
                Column { name: "date", sql_type: "TEXT" },
            ],
            key: &["channel_name", "date"],
        };

        let (_dir, mut store) = open_temp_store();
        store
            .write(
                &ENGAGEMENT,
                &[
                    vec![Value::Text("general".into()), Value::Text("2024-01-03".into())],
                    vec![Value::Text("general".into()), Value::Text("2024-01-05".into())],
                    vec![Value::Text("dev".into()), Value::Text("2024-01-04".into())],
                ],
            )
            .unwrap();

        let latest = store.latest_date("channels_engagement", "date").unwrap();
        assert_eq!(latest, Some(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()));
    }
}
