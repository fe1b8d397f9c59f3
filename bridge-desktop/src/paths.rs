//! Per-user locations of the shell socket and the settings database.

use std::path::PathBuf;

/// Where shell integrations expect the socket: `<runtime dir>/<app>/socket`.
///
/// Falls back to the temporary directory when the platform has no runtime
/// directory (macOS, Windows, or Linux without `XDG_RUNTIME_DIR`).
pub fn socket_path(application_name: &str) -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(application_name)
        .join("socket")
}

/// Configuration directory of the application.
pub fn config_dir(application_name: &str) -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
        })
        .join(application_name)
}

pub fn settings_db_path(application_name: &str) -> PathBuf {
    config_dir(application_name).join("settings.db")
}
