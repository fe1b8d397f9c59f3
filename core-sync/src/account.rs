//! Account state as seen by the scheduler.
//!
//! Authentication and capability discovery happen elsewhere; the scheduler
//! only cares whether the account is reachable, how often the server lets
//! us poll, and what the shell menu may offer.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Server features relevant to the shell menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCapabilities {
    pub share_api: bool,
    pub share_public_link: bool,
    pub public_link_enforce_password: bool,
    pub versioning: bool,
    /// Server returns private link urls in PROPFIND replies
    pub private_link_details: bool,
}

impl Default for AccountCapabilities {
    fn default() -> Self {
        Self {
            share_api: true,
            share_public_link: true,
            public_link_enforce_password: false,
            versioning: true,
            private_link_details: true,
        }
    }
}

/// One configured account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    /// Settings id, e.g. `"0"`
    pub id: String,
    pub uuid: Uuid,
    pub display_name: String,
    /// WebDAV base url
    pub dav_url: String,
    pub user: String,
    pub connected: bool,
    /// Minimum poll interval mandated by the server
    pub server_poll_interval: Option<Duration>,
    pub capabilities: AccountCapabilities,
    /// Last etag a remote check for any of this account's folders returned
    pub last_successful_etag: Option<String>,
}

impl AccountState {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        dav_url: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            uuid: Uuid::new_v4(),
            display_name: display_name.into(),
            dav_url: dav_url.into(),
            user: user.into(),
            connected: false,
            server_poll_interval: None,
            capabilities: AccountCapabilities::default(),
            last_successful_etag: None,
        }
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn with_connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }

    pub fn with_server_poll_interval(mut self, interval: Duration) -> Self {
        self.server_poll_interval = Some(interval);
        self
    }

    pub fn with_capabilities(mut self, capabilities: AccountCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Whether the share dialog can be offered at all.
    pub fn sharing_available(&self, user_group_sharing: bool, link_sharing: bool) -> bool {
        self.capabilities.share_api && (user_group_sharing || link_sharing)
    }

    /// Public links can be created without opening the dialog.
    pub fn can_copy_public_link(&self, link_sharing: bool) -> bool {
        link_sharing
            && self.capabilities.share_public_link
            && !self.capabilities.public_link_enforce_password
    }
}
