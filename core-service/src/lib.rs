//! Sync client façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (sync backend,
//! filesystem probe, settings store, etag fetcher, file watcher) into the
//! scheduling core and runs it as one [`SyncClient`] task. Desktop apps
//! typically enable the `desktop-shims` feature (which depends on
//! `bridge-desktop`) and call [`bootstrap_desktop`].
//!
//! ```ignore
//! use core_service::{init_logging, LoggingConfig, SyncClient, CoreDependencies};
//!
//! init_logging(LoggingConfig::default())?;
//! let (client, handle) = SyncClient::new(config, deps)?;
//! tokio::spawn(client.run());
//! handle.add_account(account).await?;
//! ```

mod client;
pub mod error;
mod handle;

pub use client::SyncClient;
pub use error::{Result, ServiceError};
pub use handle::ClientHandle;

pub use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
pub use core_runtime::{ClientConfig, FolderDefinition, TooNewPolicy};
pub use core_sync::{AccountCapabilities, AccountState, SyncStatus};

use bridge_traits::{
    EngineEventReceiver, LocalFileSystem, RemoteEtagFetcher, SettingsStore, SyncBackend,
};
use std::sync::Arc;

/// Everything the client needs from the host.
///
/// The engine event receiver belongs to the channel the host wired into
/// `backend` when building it.
pub struct CoreDependencies {
    pub backend: Arc<dyn SyncBackend>,
    pub filesystem: Arc<dyn LocalFileSystem>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub etag_fetcher: Arc<dyn RemoteEtagFetcher>,
    pub engine_events: EngineEventReceiver,
}

impl CoreDependencies {
    pub fn new(
        backend: Arc<dyn SyncBackend>,
        filesystem: Arc<dyn LocalFileSystem>,
        settings_store: Arc<dyn SettingsStore>,
        etag_fetcher: Arc<dyn RemoteEtagFetcher>,
        engine_events: EngineEventReceiver,
    ) -> Self {
        Self {
            backend,
            filesystem,
            settings_store,
            etag_fetcher,
            engine_events,
        }
    }
}

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub use desktop::{bootstrap_desktop, DesktopClient};

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
mod desktop {
    use super::*;
    use bridge_desktop::{
        paths, DavEtagFetcher, DesktopFileSystem, NotifyFolderWatcher, SqliteSettingsStore,
    };
    use tracing::info;

    /// A client built from the desktop adapters, ready to `run`.
    pub struct DesktopClient {
        pub client: SyncClient,
        pub handle: ClientHandle,
        /// Takes per-account credentials for the remote etag checks
        pub etag_fetcher: Arc<DavEtagFetcher>,
    }

    /// Builds a client on the SQLite settings database, the `notify`
    /// watcher and the WebDAV etag fetcher, and starts the shell socket on
    /// Unix.
    pub async fn bootstrap_desktop(
        config: ClientConfig,
        backend: Arc<dyn SyncBackend>,
        engine_events: EngineEventReceiver,
    ) -> Result<DesktopClient> {
        let app = config.application_name.clone();
        let settings =
            SqliteSettingsStore::new(paths::settings_db_path(&app)).await?;
        let etag_fetcher = Arc::new(DavEtagFetcher::new(&format!(
            "{}/{}",
            app, config.client_version
        ))?);
        let socket_path = config
            .socket_path
            .clone()
            .unwrap_or_else(|| paths::socket_path(&app));

        let deps = CoreDependencies::new(
            backend,
            Arc::new(DesktopFileSystem::new()),
            Arc::new(settings),
            etag_fetcher.clone(),
            engine_events,
        );
        let (client, handle) = SyncClient::new(config, deps)?;
        let client = client.with_watcher(|events| {
            Box::new(NotifyFolderWatcher::new(events)) as Box<dyn bridge_traits::FileWatcher>
        });

        #[cfg(unix)]
        client.listen(&socket_path).await?;
        info!(socket = %socket_path.display(), "Desktop sync client ready");

        Ok(DesktopClient {
            client,
            handle,
            etag_fetcher,
        })
    }
}
