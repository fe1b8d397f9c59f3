//! Key-value settings persistence.
//!
//! Keys are `/` separated paths such as `Accounts/0/Folders/1/localPath`.
//! The backend does not interpret them beyond prefix listing.

use async_trait::async_trait;

use crate::error::Result;

/// Settings store trait
///
/// Persists configuration as flat typed key-value pairs:
/// - Desktop: SQLite table
/// - Tests: in-memory map
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn remember_pause(store: &dyn SettingsStore) -> Result<()> {
///     store.set_bool("Accounts/0/Folders/1/paused", true).await
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    async fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    async fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    async fn set_i64(&self, key: &str, value: i64) -> Result<()>;

    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn has_key(&self, key: &str) -> Result<bool>;

    /// All keys starting with `prefix`, sorted.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete every key starting with `prefix`; returns how many went.
    async fn remove_prefix(&self, prefix: &str) -> Result<u64>;
}
