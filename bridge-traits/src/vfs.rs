//! Virtual file system contract.
//!
//! A folder runs with exactly one VFS variant. The plain "off" variant is
//! provided by the core; placeholder variants come from the platform.

use crate::engine::SyncFileStatus;
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::mpsc;

/// Available VFS variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VfsMode {
    /// Every file is fully local
    #[default]
    Off,
    /// Placeholders are files with a suffix
    WithSuffix,
    /// Windows cloud files API
    WindowsCfApi,
}

impl VfsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::WithSuffix => "suffix",
            Self::WindowsCfApi => "wincfapi",
        }
    }
}

impl fmt::Display for VfsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VfsMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "suffix" => Ok(Self::WithSuffix),
            "wincfapi" => Ok(Self::WindowsCfApi),
            other => Err(BridgeError::OperationFailed(format!(
                "Unknown vfs mode: {other}"
            ))),
        }
    }
}

/// Per-path hydration policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinState {
    /// Take the state of the parent
    Inherited,
    AlwaysLocal,
    OnlineOnly,
    Unspecified,
    Excluded,
}

impl PinState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inherited => "inherited",
            Self::AlwaysLocal => "always_local",
            Self::OnlineOnly => "online_only",
            Self::Unspecified => "unspecified",
            Self::Excluded => "excluded",
        }
    }
}

/// Combined availability of a path and everything below it.
///
/// Ordered from "most local" to "most remote".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VfsItemAvailability {
    AlwaysLocal,
    AllHydrated,
    Mixed,
    AllDehydrated,
    OnlineOnly,
}

impl VfsItemAvailability {
    /// Merge the availability of two items into the one shown for both.
    pub fn merge(self, other: Self) -> Self {
        if self == other {
            return self;
        }
        let (lhs, rhs) = if self < other { (self, other) } else { (other, self) };
        match (lhs, rhs) {
            (Self::AlwaysLocal, Self::AllHydrated) => Self::AllHydrated,
            (Self::AllDehydrated, Self::OnlineOnly) => Self::AllDehydrated,
            _ => Self::Mixed,
        }
    }
}

/// Why [`Vfs::availability`] could not answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityError {
    DbError,
    NoSuchItem,
}

/// Hydration notifications from a placeholder backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VfsEvent {
    HydrationStarted,
    HydrationFinished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsMessage {
    pub alias: String,
    pub event: VfsEvent,
}

pub type VfsEventSender = mpsc::UnboundedSender<VfsMessage>;
pub type VfsEventReceiver = mpsc::UnboundedReceiver<VfsMessage>;

/// Parameters for [`Vfs::start`].
#[derive(Debug, Clone)]
pub struct VfsSetupParams {
    pub alias: String,
    pub filesystem_path: PathBuf,
    pub remote_path: String,
    pub provider_name: String,
    pub events: Option<VfsEventSender>,
}

/// Capabilities every VFS variant provides.
pub trait Vfs: Send {
    fn mode(&self) -> VfsMode;

    fn start(&mut self, params: &VfsSetupParams) -> Result<()>;

    fn stop(&mut self);

    /// Remove every artifact of this variant (placeholders, registrations).
    fn wipe_artifacts(&mut self) -> Result<()>;

    fn set_pin_state(&mut self, relative_path: &str, state: PinState) -> Result<()>;

    fn pin_state(&self, relative_path: &str) -> Option<PinState>;

    fn availability(
        &self,
        relative_path: &str,
    ) -> std::result::Result<VfsItemAvailability, AvailabilityError>;

    fn file_status_changed(&mut self, system_path: &Path, status: SyncFileStatus);

    fn is_hydrating(&self) -> bool;

    /// Strip placeholder decorations from a file name.
    fn underlying_file_name(&self, name: &str) -> String {
        name.to_string()
    }

    /// Whether the shell menu should offer pin actions.
    fn pin_actions_shown(&self) -> bool;
}
