//! # Shell Integration Protocol
//!
//! Local line protocol spoken with file manager plugins (overlay icons,
//! context menus, share dialogs).
//!
//! ## Components
//!
//! - **Message** (`message`): framing, NFC normalization, request parsing
//! - **Listener** (`listener`): one connected client and its monitored directories
//! - **Jobs** (`jobs`): replies for `ASYNC_*` and `V2/*` requests
//! - **Menu** (`menu`): context menu entries and localized strings
//! - **SocketApi** (`api`): dispatch against the folder scheduler, status pushes
//! - **Server** (`server`): Unix domain socket transport
//!
//! The transport tasks never touch folder state. They forward
//! [`SocketEvent`]s to the service loop, which hands them to [`SocketApi`]
//! together with the [`core_sync::FolderMan`].

pub mod api;
pub mod error;
pub mod file_data;
pub mod jobs;
pub mod listener;
pub mod menu;
pub mod message;
#[cfg(unix)]
pub mod server;

pub use api::{AsyncHandler, PendingFlush, ShareStartPage, SocketApi, V2Handler};
pub use error::{ProtocolError, Result};
pub use jobs::{SocketApiJob, SocketApiJobV2};
pub use listener::{
    FrameReceiver, FrameSender, ListenerHandle, ListenerId, OutboundFrame, SocketEvent,
    SocketEventReceiver, SocketEventSender, SocketListener,
};
#[cfg(unix)]
pub use server::SocketServer;
