//! Runtime settings for the serving process and the failover pair.
//!
//! The binary fills these from its command line; [`Default`] carries the values the
//! primary and standby use when nothing is overridden.

use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_SERVE_PORT: u16 = 5555;
pub const DEFAULT_HEARTBEAT_PORT: u16 = 5556;
pub const DEFAULT_STANDBY_PEER_PORT: u16 = 5557;
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_TIMEOUT_MULTIPLIER: u32 = 4;

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Settings for one serving instance (accept loop, registry and broadcaster).
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Period of the lobby and game-view broadcast.
    pub broadcast_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: localhost(DEFAULT_SERVE_PORT),
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
        }
    }
}

/// Where and how often an active process announces that it is alive.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    pub peer_addr: SocketAddr,
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            peer_addr: localhost(DEFAULT_HEARTBEAT_PORT),
            interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Settings for a standby process watching the primary.
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverConfig {
    /// Datagram address heartbeats arrive on.
    pub listen_addr: SocketAddr,
    /// Heartbeat destination once this process has taken over.
    pub peer_addr: SocketAddr,
    /// Server settings used after promotion.
    pub serve: ServerConfig,
    pub heartbeat_interval: Duration,
    pub timeout_multiplier: u32,
}

impl FailoverConfig {
    /// Silence longer than this promotes the standby.
    pub fn failover_timeout(&self) -> Duration {
        self.heartbeat_interval * self.timeout_multiplier.max(1)
    }

    pub fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            peer_addr: self.peer_addr,
            interval: self.heartbeat_interval,
        }
    }
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            listen_addr: localhost(DEFAULT_HEARTBEAT_PORT),
            peer_addr: localhost(DEFAULT_STANDBY_PEER_PORT),
            serve: ServerConfig::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            timeout_multiplier: DEFAULT_TIMEOUT_MULTIPLIER,
        }
    }
}
