//! Client bookkeeping owned by the hub task.
//!
//! Nothing in here is synchronized: the [`Registry`] is only ever touched from
//! inside the hub's event loop, so plain `HashMap` access is enough.

use std::{
    collections::HashMap,
    fmt,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use crate::error::HubError;

/// Sending half of a client's outbound queue. Held by the hub only.
pub type OutboundSender = mpsc::Sender<Arc<str>>;
/// Receiving half of a client's outbound queue. Held by that client's writer.
pub type OutboundReceiver = mpsc::Receiver<Arc<str>>;

/// Creates a bounded outbound queue for one client.
pub fn outbound_queue(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Stable label for one connected party, derived from its remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for ClientId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<&str> for ClientId {
    fn from(label: &str) -> Self {
        Self(label.to_string())
    }
}

impl From<String> for ClientId {
    fn from(label: String) -> Self {
        Self(label)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered client as seen by the hub.
///
/// Dropping it closes the outbound queue and cancels the token its session
/// holds, which is how a session learns that the hub let go of it.
pub struct Client {
    id: ClientId,
    outbound: OutboundSender,
    joined_at: Instant,
    dropped: u64,
    _removed: DropGuard,
}

impl Client {
    pub fn new(id: ClientId, outbound: OutboundSender, removed: DropGuard) -> Self {
        Self {
            id,
            outbound,
            joined_at: Instant::now(),
            dropped: 0,
            _removed: removed,
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn outbound(&self) -> &OutboundSender {
        &self.outbound
    }

    pub fn connected_for(&self) -> Duration {
        self.joined_at.elapsed()
    }

    /// Lines discarded for this client because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub(crate) fn record_drop(&mut self) -> u64 {
        self.dropped += 1;
        self.dropped
    }
}

/// Map of live clients keyed by id.
#[derive(Default)]
pub struct Registry {
    clients: HashMap<ClientId, Client>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `client`. A live duplicate is rejected and the existing entry
    /// is kept as is.
    pub fn insert(&mut self, client: Client) -> Result<(), HubError> {
        if self.clients.contains_key(client.id()) {
            return Err(HubError::DuplicateClient(client.id().clone()));
        }
        self.clients.insert(client.id().clone(), client);
        Ok(())
    }

    /// Unregisters `id`. Unknown ids are ignored.
    pub fn remove(&mut self, id: &ClientId) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Client> {
        self.clients.values_mut()
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// A chat line accepted by the hub.
///
/// `seq` is the hub's logical clock: it grows by one for every chat line the
/// hub processes, so comparing two messages' `seq` gives their broadcast order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMessage {
    origin: ClientId,
    text: String,
    seq: u64,
}

impl BroadcastMessage {
    pub(crate) fn new(origin: ClientId, text: String, seq: u64) -> Self {
        Self { origin, text, seq }
    }

    pub fn origin(&self) -> &ClientId {
        &self.origin
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}
