//! Primary/standby failover over a datagram heartbeat.
//!
//! The active process sends [`HEARTBEAT_TOKEN`] to its peer on a fixed interval. A standby
//! [`Supervisor`] listens for it, and once nothing has arrived for
//! `heartbeat_interval * timeout_multiplier` it starts a full [`Server`] of its own and
//! begins sending heartbeats itself. An active supervisor that hears another heartbeat
//! only reports it; it keeps serving.

use crate::config::{FailoverConfig, HeartbeatConfig};
use crate::events::EventSink;
use crate::network::{shutdown_signalled, Server};
use log::{debug, error, info, warn};
use serde_json::json;
use shared::HEARTBEAT_TOKEN;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Standby,
    Active { serving: SocketAddr },
}

/// Spawns the task that announces this process as the live primary.
pub fn spawn_heartbeat_sender(
    config: HeartbeatConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let local: SocketAddr = if config.peer_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = match UdpSocket::bind(local).await {
            Ok(socket) => socket,
            Err(e) => {
                error!("Failed to bind heartbeat socket: {}", e);
                return;
            }
        };
        info!(
            "Sending heartbeats to {} every {:?}",
            config.peer_addr, config.interval
        );

        let mut ticker = interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = socket.send_to(HEARTBEAT_TOKEN, config.peer_addr).await {
                        debug!("Failed to send heartbeat to {}: {}", config.peer_addr, e);
                    }
                }
                _ = shutdown_signalled(&mut shutdown) => break,
            }
        }
        debug!("Heartbeat sender stopped");
    })
}

/// Everything started by a promotion, stopped together.
struct Promotion {
    shutdown: watch::Sender<bool>,
    server: JoinHandle<io::Result<()>>,
    heartbeat: JoinHandle<()>,
}

impl Promotion {
    async fn stop(self) {
        self.shutdown.send_replace(true);
        match self.server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Promoted server failed: {}", e),
            Err(e) => error!("Promoted server task failed: {}", e),
        }
        if let Err(e) = self.heartbeat.await {
            error!("Heartbeat task failed: {}", e);
        }
    }
}

/// Watches the primary's heartbeat and takes over when it goes quiet.
pub struct Supervisor {
    socket: UdpSocket,
    config: FailoverConfig,
    events: Arc<dyn EventSink>,
    state: watch::Sender<SupervisorState>,
}

impl Supervisor {
    pub async fn bind(config: FailoverConfig, events: Arc<dyn EventSink>) -> io::Result<Self> {
        let socket = UdpSocket::bind(config.listen_addr).await?;
        info!(
            "Standby listening for heartbeats on {}, failover after {:?}",
            socket.local_addr()?,
            config.failover_timeout()
        );
        let (state, _) = watch::channel(SupervisorState::Standby);

        Ok(Self {
            socket,
            config,
            events,
            state,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Listens until `shutdown` fires, promoting at most once along the way.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let failover_after = self.config.failover_timeout();
        let poll = self.config.heartbeat_interval;
        let mut last_seen = Instant::now();
        let mut active: Option<Promotion> = None;
        let mut buf = [0u8; 1024];

        loop {
            tokio::select! {
                received = timeout(poll, self.socket.recv_from(&mut buf)) => match received {
                    Ok(Ok((len, from))) if &buf[..len] == HEARTBEAT_TOKEN => {
                        last_seen = Instant::now();
                        if active.is_some() {
                            warn!("Heartbeat from {} while serving as primary; staying active", from);
                        } else {
                            debug!("Heartbeat from {}", from);
                        }
                    }
                    Ok(Ok((len, from))) => {
                        debug!("Ignoring {} unexpected bytes from {}", len, from);
                    }
                    Ok(Err(e)) => {
                        warn!("Heartbeat receive failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    Err(_) => {}
                },
                _ = shutdown_signalled(&mut shutdown) => break,
            }

            if active.is_none() && last_seen.elapsed() > failover_after {
                warn!(
                    "No heartbeat for {:?}; promoting to primary",
                    last_seen.elapsed()
                );
                match self.promote().await {
                    Ok(promotion) => active = Some(promotion),
                    Err(e) => {
                        error!("Failed to promote: {}", e);
                        last_seen = Instant::now();
                    }
                }
            }
        }

        info!("Supervisor shutting down");
        if let Some(promotion) = active {
            promotion.stop().await;
        }
        Ok(())
    }

    async fn promote(&self) -> io::Result<Promotion> {
        let server = Server::bind(self.config.serve.clone(), self.events.clone()).await?;
        let serving = server.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        let server = tokio::spawn(server.run(shutdown_rx.clone()));
        let heartbeat = spawn_heartbeat_sender(self.config.heartbeat(), shutdown_rx);

        info!("Promoted to primary, serving on {}", serving);
        self.events
            .record("promoted", json!({ "serving": serving.to_string() }));
        self.state.send_replace(SupervisorState::Active { serving });

        Ok(Promotion {
            shutdown,
            server,
            heartbeat,
        })
    }
}
