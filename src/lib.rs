//! Workspace facade crate.
//!
//! Host applications depend on `foldersync-workspace` and pick the desktop
//! adapters through the `desktop-shims` feature instead of wiring each
//! workspace crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
