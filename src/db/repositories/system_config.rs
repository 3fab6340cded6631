use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use crate::db::connection::Database;
use crate::ledger::ConfigSource;

impl Database {
    /// Insert or replace a `system_config` entry.
    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO system_config (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .with_context(|| format!("failed to store config key {key}"))?;
            Ok(())
        })
        .await
    }

    pub async fn all_config(&self) -> Result<BTreeMap<String, String>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM system_config ORDER BY key")?;
            let entries = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            Ok(entries)
        })
        .await
    }
}

#[async_trait]
impl ConfigSource for Database {
    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM system_config WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_support::temp_database;

    #[tokio::test]
    async fn defaults_are_seeded() {
        let (_dir, db) = temp_database();
        assert_eq!(db.get_config("versus_mode").await.unwrap().as_deref(), Some("1"));
        assert_eq!(
            db.get_config("debug_enabled").await.unwrap().as_deref(),
            Some("false")
        );
        assert_eq!(db.get_config("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_config_overwrites() {
        let (_dir, db) = temp_database();
        db.set_config("versus_mode", "3").await.unwrap();
        db.set_config("kiosk_name", "front").await.unwrap();

        let all = db.all_config().await.unwrap();
        assert_eq!(all.get("versus_mode").map(String::as_str), Some("3"));
        assert_eq!(all.get("kiosk_name").map(String::as_str), Some("front"));
    }
}
