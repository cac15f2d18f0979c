use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use clap::ValueEnum;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;
pub const DEFAULT_HUB_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// What the hub does when a client's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OverflowPolicy {
    /// Skip the line for that client only; it stays connected.
    DropNewest,
    /// Evict the client and announce that it left.
    #[default]
    Disconnect,
}

/// Runtime options for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    /// Read inactivity after which a client is disconnected. `None` disables it.
    pub idle_timeout: Option<Duration>,
    pub outbound_capacity: usize,
    /// Whether a sender gets its own chat lines back.
    pub include_origin: bool,
    pub overflow: OverflowPolicy,
    pub hub_capacity: usize,
    /// How long a closing session waits for its writer to flush queued lines.
    pub drain_timeout: Duration,
    pub max_line_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            idle_timeout: None,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            include_origin: true,
            overflow: OverflowPolicy::default(),
            hub_capacity: DEFAULT_HUB_CAPACITY,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl RelayConfig {
    pub fn hub(&self) -> HubConfig {
        HubConfig {
            capacity: self.hub_capacity,
            include_origin: self.include_origin,
            overflow: self.overflow,
        }
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            idle_timeout: self.idle_timeout,
            outbound_capacity: self.outbound_capacity,
            drain_timeout: self.drain_timeout,
            max_line_bytes: self.max_line_bytes,
        }
    }
}

/// The slice of [`RelayConfig`] the hub task needs.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    pub capacity: usize,
    pub include_origin: bool,
    pub overflow: OverflowPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        RelayConfig::default().hub()
    }
}

/// The slice of [`RelayConfig`] each session needs.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub idle_timeout: Option<Duration>,
    pub outbound_capacity: usize,
    pub drain_timeout: Duration,
    pub max_line_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        RelayConfig::default().session()
    }
}

/// Maps the CLI's "seconds, 0 disables" convention onto an optional duration.
pub fn idle_timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
