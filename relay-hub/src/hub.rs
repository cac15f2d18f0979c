//! The hub: single owner of the client registry.
//!
//! Every join, leave and chat line goes through one bounded channel and is
//! handled to completion by one task before the next event is looked at. That
//! gives all clients the same total order of lines and means the registry
//! needs no lock.
//!
//! Fan-out never awaits a client. Each line is offered to every outbound queue
//! with `try_send`; a full queue is resolved by [`OverflowPolicy`] so one stuck
//! reader can't hold up everybody else.

use std::{collections::VecDeque, sync::Arc};

use tokio::{
    runtime::Handle,
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    config::{HubConfig, OverflowPolicy},
    error::HubError,
    protocol::ServerLine,
    registry::{BroadcastMessage, Client, ClientId, OutboundSender, Registry},
};

/// Events the hub serializes.
enum HubEvent {
    Join {
        client: Client,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },
    Leave {
        id: ClientId,
    },
    Broadcast {
        origin: ClientId,
        text: String,
    },
    Snapshot {
        respond_to: oneshot::Sender<Vec<ClientId>>,
    },
}

/// Cloneable handle for submitting events to a running hub.
///
/// The hub task stops once every handle has been dropped.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    /// Registers `id` and waits until the hub has processed the join.
    ///
    /// Once this returns, every line the hub handles afterwards is offered to
    /// `outbound`. Nothing handled earlier ever is. The returned token is
    /// cancelled when the hub drops the client again, whether through a leave,
    /// an eviction or the hub stopping.
    pub async fn join(
        &self,
        id: ClientId,
        outbound: OutboundSender,
    ) -> Result<CancellationToken, HubError> {
        let removed = CancellationToken::new();
        let (respond_to, response) = oneshot::channel();
        self.submit(HubEvent::Join {
            client: Client::new(id, outbound, removed.clone().drop_guard()),
            respond_to,
        })
        .await?;
        response.await.map_err(|_| HubError::HubClosed)??;
        Ok(removed)
    }

    /// Unregisters `id`, closing its outbound queue. Unknown ids are ignored.
    pub async fn leave(&self, id: ClientId) -> Result<(), HubError> {
        self.submit(HubEvent::Leave { id }).await
    }

    /// Non-async variant of [`HubHandle::leave`] for use from `Drop`.
    ///
    /// When the event queue is full the leave is handed to a spawned task so
    /// it is still delivered in order with whatever is queued.
    pub fn try_leave(&self, id: ClientId) -> Result<(), HubError> {
        match self.events.try_send(HubEvent::Leave { id }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                let runtime = Handle::try_current().map_err(|_| HubError::HubClosed)?;
                let events = self.events.clone();
                runtime.spawn(async move {
                    let _ = events.send(event).await;
                });
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(HubError::HubClosed),
        }
    }

    /// Submits a chat line from `origin` for fan-out.
    pub async fn broadcast(&self, origin: ClientId, text: String) -> Result<(), HubError> {
        self.submit(HubEvent::Broadcast { origin, text }).await
    }

    /// Currently registered ids, sorted.
    pub async fn clients(&self) -> Result<Vec<ClientId>, HubError> {
        let (respond_to, response) = oneshot::channel();
        self.submit(HubEvent::Snapshot { respond_to }).await?;
        response.await.map_err(|_| HubError::HubClosed)
    }

    async fn submit(&self, event: HubEvent) -> Result<(), HubError> {
        self.events
            .send(event)
            .await
            .map_err(|_| HubError::HubClosed)
    }
}

pub struct Hub {
    registry: Registry,
    events: mpsc::Receiver<HubEvent>,
    config: HubConfig,
    next_seq: u64,
}

impl Hub {
    /// Starts the hub task on the current tokio runtime.
    pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (events_tx, events) = mpsc::channel(config.capacity.max(1));
        let hub = Hub {
            registry: Registry::new(),
            events,
            config,
            next_seq: 0,
        };
        let task = tokio::spawn(hub.run());
        (HubHandle { events: events_tx }, task)
    }

    async fn run(mut self) {
        debug!(
            include_origin = self.config.include_origin,
            overflow = ?self.config.overflow,
            "hub started"
        );

        while let Some(event) = self.events.recv().await {
            self.handle(event);
        }

        info!(
            remaining = self.registry.len(),
            "all hub handles dropped, hub stopping"
        );
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Join { client, respond_to } => {
                let result = self.join(client);
                // The session may have given up waiting; the registration stands
                // until its guard sends the matching leave.
                let _ = respond_to.send(result);
            }
            HubEvent::Leave { id } => self.leave(&id),
            HubEvent::Broadcast { origin, text } => self.broadcast(origin, text),
            HubEvent::Snapshot { respond_to } => {
                let _ = respond_to.send(self.registry.ids());
            }
        }
    }

    fn join(&mut self, client: Client) -> Result<(), HubError> {
        let id = client.id().clone();
        if self.registry.contains(&id) {
            error!(client = %id, "duplicate join for a live client");
            return Err(HubError::DuplicateClient(id));
        }

        let welcome = ServerLine::Welcome { id: id.clone() }.to_string();
        if let Err(err) = client.outbound().try_send(Arc::from(welcome)) {
            debug!(client = %id, error = %err, "could not queue welcome line");
        }

        // Announce before inserting so the newcomer doesn't hear about itself.
        self.fan_out(ServerLine::Arrived { id: id.clone() }.to_string(), None);
        self.registry.insert(client)?;

        info!(client = %id, clients = self.registry.len(), "client joined");
        Ok(())
    }

    fn leave(&mut self, id: &ClientId) {
        let Some(client) = self.registry.remove(id) else {
            trace!(client = %id, "leave for unregistered client ignored");
            return;
        };

        info!(
            client = %id,
            connected_for = ?client.connected_for(),
            dropped = client.dropped(),
            clients = self.registry.len(),
            "client left"
        );
        // Closes the queue and cancels the session's removal token.
        drop(client);

        self.fan_out(ServerLine::Left { id: id.clone() }.to_string(), None);
    }

    fn broadcast(&mut self, origin: ClientId, text: String) {
        if !self.registry.contains(&origin) {
            debug!(client = %origin, "line from unregistered client discarded");
            return;
        }

        self.next_seq += 1;
        let message = BroadcastMessage::new(origin, text, self.next_seq);
        trace!(seq = message.seq(), origin = %message.origin(), "relaying line");

        let skip = (!self.config.include_origin).then(|| message.origin().clone());
        let line = ServerLine::Chat {
            origin: message.origin().clone(),
            text: message.text().to_string(),
        };
        self.fan_out(line.to_string(), skip.as_ref());
    }

    /// Offers `line` to every registered client except `skip`.
    ///
    /// Clients evicted along the way are announced as having left, after the
    /// line that evicted them, and those announcements go through the same
    /// overflow handling.
    fn fan_out(&mut self, line: String, skip: Option<&ClientId>) {
        let mut pending = VecDeque::from([Arc::<str>::from(line)]);
        let mut skip = skip.cloned();

        while let Some(line) = pending.pop_front() {
            let evicted = self.deliver(&line, skip.take().as_ref());
            for id in evicted {
                if let Some(client) = self.registry.remove(&id) {
                    info!(
                        client = %id,
                        connected_for = ?client.connected_for(),
                        clients = self.registry.len(),
                        "client evicted"
                    );
                    pending.push_back(Arc::from(ServerLine::Left { id }.to_string()));
                }
            }
        }
    }

    fn deliver(&mut self, line: &Arc<str>, skip: Option<&ClientId>) -> Vec<ClientId> {
        let overflow = self.config.overflow;
        let mut evicted = Vec::new();

        for client in self.registry.iter_mut() {
            if skip == Some(client.id()) {
                continue;
            }

            match client.outbound().try_send(Arc::clone(line)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => match overflow {
                    OverflowPolicy::DropNewest => {
                        let dropped = client.record_drop();
                        warn!(client = %client.id(), dropped, "outbound queue full, line dropped");
                    }
                    OverflowPolicy::Disconnect => {
                        warn!(client = %client.id(), "outbound queue full, disconnecting client");
                        evicted.push(client.id().clone());
                    }
                },
                Err(TrySendError::Closed(_)) => {
                    debug!(client = %client.id(), "outbound queue closed, removing client");
                    evicted.push(client.id().clone());
                }
            }
        }

        evicted
    }
}
