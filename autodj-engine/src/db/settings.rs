//! Settings table access
//!
//! Key/value rows in the `settings` table. Values are stored as text and
//! parsed on read.

use crate::bandit::WeightStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

/// Key holding the serialized transition-style weight table
pub const BANDIT_WEIGHTS_KEY: &str = "dj_bandit_weights";

/// Load the serialized transition-style weights, if stored
pub async fn load_bandit_weights(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, BANDIT_WEIGHTS_KEY).await
}

/// Store the serialized transition-style weights
pub async fn save_bandit_weights(db: &Pool<Sqlite>, raw: &str) -> Result<()> {
    set_setting(db, BANDIT_WEIGHTS_KEY, raw).await
}

/// Generic setting getter
///
/// Returns `None` when the key is absent.
pub async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match value {
        Some(s) => match s.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Generic setting setter
///
/// Inserts or updates the row.
pub async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    let value_str = value.to_string();

    sqlx::query(
        r#"
        INSERT INTO settings (key, value)
        VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value_str)
    .execute(db)
    .await?;

    Ok(())
}

/// Weight store backed by the settings table
#[derive(Clone)]
pub struct SqliteWeightStore {
    db: Pool<Sqlite>,
}

impl SqliteWeightStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WeightStore for SqliteWeightStore {
    async fn load(&self) -> Result<Option<String>> {
        load_bandit_weights(&self.db).await
    }

    async fn save(&self, raw: &str) -> Result<()> {
        save_bandit_weights(&self.db, raw)
            .await
            .map_err(|e| Error::Persistence(e.to_string()))
    }
}
