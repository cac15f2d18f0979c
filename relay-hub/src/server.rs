use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    task::{JoinError, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::{RelayConfig, SessionConfig},
    hub::{Hub, HubHandle},
    registry::ClientId,
    session::run_session,
};

/// Accepts TCP connections and runs one session per connection against a
/// shared hub.
pub struct Server {
    listener: TcpListener,
    config: RelayConfig,
}

impl Server {
    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self { listener, config }
    }

    /// Binds `config.listen` and wraps the listener.
    pub async fn bind(config: RelayConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.listen).await?;
        Ok(Self::new(listener, config))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `shutdown` resolves, then closes every session and waits
    /// for the hub to stop.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, config } = self;
        let (hub, hub_task) = Hub::spawn(config.hub());
        let session_config = config.session();
        let cancel = CancellationToken::new();
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => match accept_result {
                    Ok((stream, peer)) => {
                        spawn_session(&mut sessions, stream, peer, &hub, session_config, &cancel);
                    }
                    Err(err) => warn!(error = ?err, "failed to accept connection"),
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    log_session_exit(finished);
                }
            }
        }

        info!(sessions = sessions.len(), "relay hub shutting down");
        drop(listener);
        cancel.cancel();
        while let Some(finished) = sessions.join_next().await {
            log_session_exit(finished);
        }

        drop(hub);
        if let Err(err) = hub_task.await {
            warn!(error = ?err, "hub task ended abnormally");
        }
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn spawn_session(
    sessions: &mut JoinSet<()>,
    stream: TcpStream,
    peer: SocketAddr,
    hub: &HubHandle,
    config: SessionConfig,
    cancel: &CancellationToken,
) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = ?err, "failed to set TCP_NODELAY");
    }

    let id = ClientId::from(peer);
    let hub = hub.clone();
    let shutdown = cancel.child_token();
    let (reader, writer) = stream.into_split();

    debug!(client = %id, "connection accepted");
    sessions.spawn(async move {
        let reason = run_session(hub, id.clone(), reader, writer, config, shutdown).await;
        debug!(client = %id, ?reason, "connection closed");
    });
}

fn log_session_exit(result: Result<(), JoinError>) {
    if let Err(err) = result {
        warn!(error = ?err, "session task failed");
    }
}
