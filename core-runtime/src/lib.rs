//! # Core Runtime Module
//!
//! Foundational pieces shared by the sync crates:
//! - Logging and tracing infrastructure
//! - Client configuration and folder definitions
//! - Settings persistence adapter with schema versioning
//! - Event bus system
//!
//! ## Overview
//!
//! Nothing in here knows about folders syncing. It only establishes the
//! configuration record, the persisted layout and the event vocabulary the
//! scheduler and the socket layer speak.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod settings;

pub use config::{ClientConfig, FolderDefinition};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, EventStream};
pub use settings::{SettingsAdapter, TooNewPolicy};
