//! Unix domain socket transport.
//!
//! The server only frames lines. Each accepted connection gets a reader task
//! forwarding lines to the service loop and a writer task draining the
//! listener's outbound queue; both stop when the peer goes away or the
//! cancellation token fires.

use crate::error::Result;
use crate::listener::{FrameReceiver, ListenerId, SocketEvent, SocketEventSender};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest request line accepted from a client.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

#[derive(Debug)]
pub struct SocketServer {
    path: PathBuf,
    listener: UnixListener,
}

impl SocketServer {
    /// Binds `path`, creating its directory with owner-only access and
    /// replacing a socket left behind by a previous run.
    pub async fn bind(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            create_private_dir(dir).await?;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "Shell socket listening");
        Ok(Self { path, listener })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accepts connections until `cancel` fires, then removes the socket.
    pub async fn run(self, events: SocketEventSender, cancel: CancellationToken) -> Result<()> {
        let mut next_id: ListenerId = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shell socket shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        next_id += 1;
                        spawn_connection(next_id, stream, events.clone(), cancel.child_token());
                    }
                    Err(e) => error!(error = %e, "Shell socket accept error"),
                },
                _ = events.closed() => {
                    debug!("Service loop gone, closing shell socket");
                    break;
                }
            }
        }

        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "Could not remove socket file");
        }
        Ok(())
    }
}

async fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .await?;
    // An existing directory keeps its mode otherwise
    tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;
    Ok(())
}

fn spawn_connection(
    id: ListenerId,
    stream: UnixStream,
    events: SocketEventSender,
    cancel: CancellationToken,
) {
    let (read, write) = stream.into_split();
    let (sender, frames) = mpsc::unbounded_channel();
    if events.send(SocketEvent::Connected { id, sender }).is_err() {
        return;
    }

    tokio::spawn(write_frames(id, write, frames));
    tokio::spawn(async move {
        let mut lines = FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = lines.next() => match next {
                    Some(Ok(line)) => {
                        if events.send(SocketEvent::Line { id, line }).is_err() {
                            break;
                        }
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!(listener = id, "Dropping overlong request line");
                    }
                    Some(Err(LinesCodecError::Io(e))) => {
                        debug!(listener = id, error = %e, "Shell connection read error");
                        break;
                    }
                    None => break,
                },
            }
        }
        events.send(SocketEvent::Disconnected { id }).ok();
    });
}

async fn write_frames(id: ListenerId, mut write: OwnedWriteHalf, mut frames: FrameReceiver) {
    while let Some(frame) = frames.recv().await {
        let written = async {
            write.write_all(frame.line.as_bytes()).await?;
            write.flush().await
        }
        .await;
        if let Err(e) = written {
            debug!(listener = id, error = %e, "Shell connection write error");
            break;
        }
        if let Some(flushed) = frame.flushed {
            flushed.send(()).ok();
        }
    }
    write.shutdown().await.ok();
}
