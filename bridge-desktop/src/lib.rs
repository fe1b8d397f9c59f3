//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `LocalFileSystem` using `std::fs` ([`DesktopFileSystem`])
//! - `SettingsStore` using a SQLite-backed key-value table ([`SqliteSettingsStore`])
//! - `FileWatcher` using the `notify` recommended backend ([`NotifyFolderWatcher`])
//! - `RemoteEtagFetcher` using a WebDAV `PROPFIND` over `reqwest` ([`DavEtagFetcher`])
//! - Per-user runtime and configuration locations ([`paths`])
//!
//! The sync engine, the journal and the VFS backends are not provided here.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{paths, DesktopFileSystem, SqliteSettingsStore};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let settings = SqliteSettingsStore::new(paths::settings_db_path("FolderSync")).await?;
//!     let fs = DesktopFileSystem::new();
//!     // Hand both to the sync client
//!     Ok(())
//! }
//! ```

mod etag;
mod filesystem;
pub mod paths;
mod settings;
mod watcher;

pub use etag::{DavCredentials, DavEtagFetcher};
pub use filesystem::DesktopFileSystem;
pub use settings::SqliteSettingsStore;
pub use watcher::NotifyFolderWatcher;
