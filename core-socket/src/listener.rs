//! One connected shell client.
//!
//! The connection's writer task owns the socket half; a listener only holds
//! the sending end of its queue, so replies keep the order in which they
//! were produced.

use crate::message::terminate;
use std::collections::HashSet;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

pub type ListenerId = u64;

/// A line waiting to be written.
#[derive(Debug)]
pub struct OutboundFrame {
    pub line: String,
    /// Completed once the line has been flushed to the socket
    pub flushed: Option<oneshot::Sender<()>>,
}

pub type FrameSender = mpsc::UnboundedSender<OutboundFrame>;
pub type FrameReceiver = mpsc::UnboundedReceiver<OutboundFrame>;

/// What a transport reports to the service loop.
#[derive(Debug)]
pub enum SocketEvent {
    Connected { id: ListenerId, sender: FrameSender },
    Line { id: ListenerId, line: String },
    Disconnected { id: ListenerId },
}

pub type SocketEventSender = mpsc::UnboundedSender<SocketEvent>;
pub type SocketEventReceiver = mpsc::UnboundedReceiver<SocketEvent>;

#[derive(Debug)]
pub struct SocketListener {
    id: ListenerId,
    sender: FrameSender,
    monitored_directories: HashSet<u64>,
}

impl SocketListener {
    pub fn new(id: ListenerId, sender: FrameSender) -> Self {
        Self {
            id,
            sender,
            monitored_directories: HashSet::new(),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Handle usable from async jobs outliving the current dispatch.
    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            id: self.id,
            sender: self.sender.clone(),
        }
    }

    pub fn send_message(&self, message: &str) {
        self.handle().send_message(message);
    }

    pub fn send_error(&self, message: &str) {
        self.send_message(&format!("ERROR:{message}"));
    }

    /// Sends a message and returns a receiver completed after the flush.
    ///
    /// `None` when the connection is already gone.
    pub fn send_message_and_wait(&self, message: &str) -> Option<oneshot::Receiver<()>> {
        let (tx, rx) = oneshot::channel();
        let frame = OutboundFrame {
            line: terminate(message),
            flushed: Some(tx),
        };
        self.sender.send(frame).ok().map(|_| rx)
    }

    /// Sends only if the client asked about the directory with this hash.
    pub fn send_message_if_directory_monitored(&self, message: &str, directory_hash: u64) {
        if self.monitored_directories.contains(&directory_hash) {
            self.send_message(message);
        }
    }

    pub fn register_monitored_directory(&mut self, directory_hash: u64) {
        self.monitored_directories.insert(directory_hash);
    }

    pub fn monitors(&self, directory_hash: u64) -> bool {
        self.monitored_directories.contains(&directory_hash)
    }
}

/// Cloneable sending side of a listener.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    id: ListenerId,
    sender: FrameSender,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn send_message(&self, message: &str) {
        trace!(listener = self.id, message, "Sending");
        let frame = OutboundFrame {
            line: terminate(message),
            flushed: None,
        };
        if self.sender.send(frame).is_err() {
            debug!(listener = self.id, "Not sending message to disconnected listener");
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
