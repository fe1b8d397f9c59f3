//! Settings Storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SettingsStore,
    time::{Clock, SystemClock},
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        value_type TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

/// SQLite-backed settings store implementation
///
/// Keeps the flat `Accounts/<id>/Folders/<alias>/<field>` keys in one table:
/// - Type-tagged values, reads with the wrong type fail
/// - Prefix listing and prefix removal for settings groups
/// - Last update time per key
pub struct SqliteSettingsStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteSettingsStore {
    /// Opens (or creates) the settings database at `db_path`.
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to connect to DB: {}", e)))?;

        let store = Self::with_pool(pool).await?;
        debug!(path = ?db_path, "Initialized settings store");
        Ok(store)
    }

    /// Create an in-memory settings store (for testing)
    pub async fn in_memory() -> Result<Self> {
        // Every connection to `:memory:` is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to connect to DB: {}", e)))?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to create table: {}", e)))?;
        Ok(Self {
            pool,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the clock stamping `updated_at`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Unix time of the last write to `key`.
    pub async fn updated_at(&self, key: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT updated_at FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to get setting: {}", e)))?;
        Ok(row.map(|row| row.get(0)))
    }

    async fn set_value(&self, key: &str, value: &str, value_type: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, value_type, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                value_type = excluded.value_type,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(value_type)
        .bind(self.clock.unix_timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| BridgeError::DatabaseError(format!("Failed to set setting: {}", e)))?;

        debug!(key = key, value_type = value_type, "Stored setting");
        Ok(())
    }

    /// Get a value and verify its type
    async fn get_value(&self, key: &str, expected_type: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value, value_type FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to get setting: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let value: String = row.get(0);
        let value_type: String = row.get(1);
        if value_type != expected_type {
            error!(
                key = key,
                expected = expected_type,
                actual = value_type,
                "Type mismatch"
            );
            return Err(BridgeError::OperationFailed(format!(
                "Type mismatch for {}: expected {}, got {}",
                key, expected_type, value_type
            )));
        }
        Ok(Some(value))
    }

    async fn get_parsed<T>(&self, key: &str, value_type: &str) -> Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_value(key, value_type).await? {
            Some(s) => s
                .parse()
                .map(Some)
                .map_err(|e| BridgeError::OperationFailed(format!("Parse error for {}: {}", key, e))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.set_value(key, value, "string").await
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.get_value(key, "string").await
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set_value(key, &value.to_string(), "bool").await
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get_parsed(key, "bool").await
    }

    async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.set_value(key, &value.to_string(), "i64").await
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        self.get_parsed(key, "i64").await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to delete setting: {}", e)))?;

        debug!(key = key, "Deleted setting");
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to check key: {}", e)))?;

        Ok(row.is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM settings WHERE substr(key, 1, ?) = ? ORDER BY key")
            .bind(prefix.chars().count() as i64)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to list keys: {}", e)))?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM settings WHERE substr(key, 1, ?) = ?")
            .bind(prefix.chars().count() as i64)
            .bind(prefix)
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to remove settings: {}", e)))?;

        debug!(prefix = prefix, removed = result.rows_affected(), "Removed settings group");
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::FixedClock;
    use chrono::DateTime;

    #[tokio::test]
    async fn test_string_operations() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store.set_string("test_key", "test_value").await.unwrap();
        let value = store.get_string("test_key").await.unwrap();
        assert_eq!(value, Some("test_value".to_string()));
        assert!(store.has_key("test_key").await.unwrap());

        store.delete("test_key").await.unwrap();
        let value = store.get_string("test_key").await.unwrap();
        assert_eq!(value, None);
        assert!(!store.has_key("test_key").await.unwrap());
    }

    #[tokio::test]
    async fn test_typed_operations() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store.set_bool("bool_key", true).await.unwrap();
        assert_eq!(store.get_bool("bool_key").await.unwrap(), Some(true));

        store.set_i64("i64_key", 42).await.unwrap();
        assert_eq!(store.get_i64("i64_key").await.unwrap(), Some(42));

        // Overwrite keeps one row
        store.set_i64("i64_key", -7).await.unwrap();
        assert_eq!(store.get_i64("i64_key").await.unwrap(), Some(-7));
    }

    #[tokio::test]
    async fn wrong_type_is_an_error() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();
        store.set_string("Accounts/version", "2").await.unwrap();
        assert!(store.get_i64("Accounts/version").await.is_err());
    }

    #[tokio::test]
    async fn prefix_listing_and_removal() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();
        store.set_string("Accounts/0/Folders/1/localPath", "/home/u/work/").await.unwrap();
        store.set_bool("Accounts/0/Folders/1/paused", false).await.unwrap();
        store.set_string("Accounts/0/Folders/2/localPath", "/home/u/other/").await.unwrap();
        store.set_i64("Accounts/1/version", 1).await.unwrap();
        // `_` and `%` are not wildcards here
        store.set_i64("Accounts_x", 1).await.unwrap();

        let keys = store.list_keys("Accounts/0/Folders/1/").await.unwrap();
        assert_eq!(
            keys,
            vec!["Accounts/0/Folders/1/localPath", "Accounts/0/Folders/1/paused"]
        );
        assert_eq!(store.list_keys("").await.unwrap().len(), 5);

        let removed = store.remove_prefix("Accounts/0/").await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(
            store.list_keys("Accounts").await.unwrap(),
            vec!["Accounts/1/version", "Accounts_x"]
        );
    }

    #[tokio::test]
    async fn writes_are_stamped_with_the_clock() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let store = SqliteSettingsStore::in_memory()
            .await
            .unwrap()
            .with_clock(Arc::new(FixedClock(at)));
        store.set_bool("Accounts/0/Folders/1/paused", true).await.unwrap();
        assert_eq!(
            store.updated_at("Accounts/0/Folders/1/paused").await.unwrap(),
            Some(1_700_000_000)
        );
        assert_eq!(store.updated_at("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.db");
        {
            let store = SqliteSettingsStore::new(path.clone()).await.unwrap();
            store.set_i64("Accounts/version", 2).await.unwrap();
            store.pool.close().await;
        }
        let store = SqliteSettingsStore::new(path).await.unwrap();
        assert_eq!(store.get_i64("Accounts/version").await.unwrap(), Some(2));
    }
}
