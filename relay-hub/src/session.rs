//! Per-connection supervision.
//!
//! A session owns one connection for its whole life: it starts the writer
//! task, registers with the hub, runs the read loop with the idle timer, and
//! tears everything down again no matter which side gave up first.
//!
//! ```text
//! Connecting --join ok--> Active --eof/error/idle/shutdown/writer exit--> Closing --> Closed
//!      \--join rejected-------------------------------------------------^
//! ```

use std::{io, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    select,
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::SessionConfig,
    error::HubError,
    hub::HubHandle,
    idle::IdleTimer,
    protocol::LineReader,
    registry::{ClientId, outbound_queue},
    writer::{WriterExit, spawn_writer},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Why a session ended. None of these are failures of the relay itself.
#[derive(Debug)]
pub enum CloseReason {
    /// The peer closed its side of the connection.
    RemoteClosed,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
    /// The hub dropped this client, e.g. because its queue overflowed.
    Evicted,
    IdleTimeout,
    Shutdown,
    /// The hub refused the registration.
    JoinRejected(HubError),
    /// The hub stopped while the session was still active.
    HubClosed,
}

/// Runs one client session to completion.
///
/// Returns once the connection has been released: the client is unregistered,
/// its outbound queue closed and the writer task finished or aborted.
pub async fn run_session<R, W>(
    hub: HubHandle,
    id: ClientId,
    reader: R,
    writer: W,
    config: SessionConfig,
    shutdown: CancellationToken,
) -> CloseReason
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = LineReader::new(reader, config.max_line_bytes);
    let (outbound_tx, outbound_rx) = outbound_queue(config.outbound_capacity);
    let writer = spawn_writer(id.clone(), outbound_rx, writer);
    let mut guard = SessionGuard::new(hub.clone(), id.clone(), writer);

    // Set before awaiting so a cancelled join is still undone by the guard.
    guard.registered = true;
    let removed = match hub.join(id.clone(), outbound_tx).await {
        Ok(removed) => removed,
        Err(err) => {
            guard.registered = false;
            warn!(client = %id, error = %err, "join rejected");
            guard.close(config.drain_timeout).await;
            return CloseReason::JoinRejected(err);
        }
    };
    guard.transition(SessionState::Active);

    let mut idle = IdleTimer::new(config.idle_timeout);
    // Expiry breaks out of the loop, so no line read after it is relayed.
    let reason = loop {
        select! {
            line = lines.next_line() => match line {
                Ok(Some(text)) => {
                    idle.touch();
                    if hub.broadcast(id.clone(), text).await.is_err() {
                        break CloseReason::HubClosed;
                    }
                }
                Ok(None) => break CloseReason::RemoteClosed,
                Err(err) => break CloseReason::ReadFailed(err),
            },
            _ = idle.expired(), if idle.is_armed() => {
                idle.fire();
                break CloseReason::IdleTimeout;
            }
            _ = shutdown.cancelled() => break CloseReason::Shutdown,
            _ = removed.cancelled() => break CloseReason::Evicted,
            exit = guard.writer_finished() => match exit {
                WriterExit::Drained => break CloseReason::Evicted,
                WriterExit::Failed(err) => break CloseReason::WriteFailed(err),
            },
        }
    };
    idle.disarm();

    match &reason {
        CloseReason::IdleTimeout => info!(client = %id, "closing idle client"),
        CloseReason::ReadFailed(err) | CloseReason::WriteFailed(err) => {
            debug!(client = %id, error = ?err, "transport error")
        }
        other => debug!(client = %id, reason = ?other, "session ending"),
    }

    guard.transition(SessionState::Closing);
    guard.close(config.drain_timeout).await;
    reason
}

/// Releases a session's hub registration and writer task.
///
/// [`SessionGuard::close`] is the orderly path. If the session future is
/// dropped or panics first, `Drop` still sends the leave and aborts the
/// writer.
struct SessionGuard {
    hub: HubHandle,
    id: ClientId,
    writer: Option<JoinHandle<WriterExit>>,
    registered: bool,
    state: SessionState,
}

impl SessionGuard {
    fn new(hub: HubHandle, id: ClientId, writer: JoinHandle<WriterExit>) -> Self {
        Self {
            hub,
            id,
            writer: Some(writer),
            registered: false,
            state: SessionState::Connecting,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(client = %self.id, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Resolves when the writer task ends on its own; pending after that.
    async fn writer_finished(&mut self) -> WriterExit {
        let Some(handle) = self.writer.as_mut() else {
            return std::future::pending().await;
        };
        let exit = match handle.await {
            Ok(exit) => exit,
            Err(err) => WriterExit::Failed(io::Error::other(err)),
        };
        self.writer = None;
        exit
    }

    async fn close(&mut self, drain_timeout: Duration) {
        if self.registered {
            // A leave for an id the hub already evicted is a no-op.
            if self.hub.leave(self.id.clone()).await.is_err() {
                debug!(client = %self.id, "hub gone before leave");
            }
            self.registered = false;
        }

        if let Some(mut writer) = self.writer.take() {
            if timeout(drain_timeout, &mut writer).await.is_err() {
                debug!(client = %self.id, "writer did not drain in time, aborting");
                writer.abort();
            }
        }

        self.transition(SessionState::Closed);
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        warn!(client = %self.id, state = ?self.state, "session dropped before closing");
        if self.registered {
            if let Err(err) = self.hub.try_leave(self.id.clone()) {
                debug!(client = %self.id, error = %err, "leave from drop failed");
            }
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}
