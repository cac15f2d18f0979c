//! Line relay: every line a client sends is rebroadcast to every connected
//! client, with join and leave announcements and an optional idle timeout.
//!
//! - [`hub`] owns the client registry and imposes one total order on joins,
//!   leaves and chat lines. It is the only place the registry is touched.
//! - [`session`] supervises one connection: registration, the read loop, the
//!   idle timer and guaranteed teardown.
//! - [`writer`] drains a client's bounded outbound queue onto its socket.
//! - [`server`] accepts TCP connections and wires each one to a session.
//! - [`client`] is a small stdin/stdout client for trying the relay out.
//! - [`protocol`] holds the newline framing and the server line formats.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod idle;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod writer;

pub use config::{OverflowPolicy, RelayConfig};
pub use error::HubError;
pub use hub::{Hub, HubHandle};
pub use registry::ClientId;
pub use server::Server;
pub use session::{CloseReason, run_session};
