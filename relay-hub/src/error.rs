use thiserror::Error;

use crate::registry::ClientId;

/// Failures surfaced by the hub's typed API.
///
/// Transport problems never show up here; they stay inside the session that
/// owns the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    /// A session tried to join with an id that is still registered. This is a
    /// supervisor bug, so the existing registration is left untouched.
    #[error("client {0} is already registered")]
    DuplicateClient(ClientId),

    #[error("hub is no longer running")]
    HubClosed,
}
