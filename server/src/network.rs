//! TCP accept loop tying connections, the session registry and the broadcaster together.

use crate::broadcast::spawn_broadcaster;
use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::events::EventSink;
use crate::registry::SessionRegistry;
use log::{error, info};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Resolves once `shutdown` carries `true` or its sender has gone away.
pub async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// One serving instance: a bound listener plus the registry its connections share.
pub struct Server {
    listener: TcpListener,
    registry: SessionRegistry,
    config: ServerConfig,
}

impl Server {
    pub async fn bind(config: ServerConfig, events: Arc<dyn EventSink>) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            registry: SessionRegistry::new(events),
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    /// Accepts connections until `shutdown` fires, then waits for every task to wind down.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let broadcaster = spawn_broadcaster(
            self.registry.clone(),
            self.config.broadcast_interval,
            shutdown.clone(),
        );
        let mut connections = JoinSet::new();

        info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("Accepted connection from {}", addr);
                        connections.spawn(handle_connection(
                            stream,
                            addr,
                            self.registry.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                }
                _ = shutdown_signalled(&mut shutdown) => break,
            }
        }

        info!("Server shutting down");
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                error!("Connection task failed: {}", e);
            }
        }
        if let Err(e) = broadcaster.await {
            error!("Broadcaster task failed: {}", e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventSink;
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            broadcast_interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_shutdown_signalled_on_true() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        timeout(Duration::from_millis(200), shutdown_signalled(&mut rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_signalled_on_dropped_sender() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        timeout(Duration::from_millis(200), shutdown_signalled(&mut rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_not_signalled_while_false() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(timeout(Duration::from_millis(50), shutdown_signalled(&mut rx))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_server_accepts_and_stops() {
        let server = Server::bind(test_config(), Arc::new(NullEventSink)).await.unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(server.run(shutdown_rx));

        let _client = TcpStream::connect(addr).await.unwrap();
        for _ in 0..50 {
            if registry.session_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.session_count().await, 1);

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(registry.session_count().await, 0);
    }
}
