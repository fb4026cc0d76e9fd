use clap::{Parser, ValueEnum};
use log::{error, info};
use server::config::{
    FailoverConfig, HeartbeatConfig, ServerConfig, DEFAULT_HEARTBEAT_PORT,
    DEFAULT_STANDBY_PEER_PORT, DEFAULT_TIMEOUT_MULTIPLIER,
};
use server::events::{EventSink, LogEventSink};
use server::failover::{spawn_heartbeat_sender, Supervisor};
use server::network::Server;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Serve immediately and send heartbeats to the standby
    Primary,
    /// Wait for the primary's heartbeats and take over when they stop
    Standby,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Whether this process serves right away or stands by
    #[arg(short, long, value_enum, default_value = "primary")]
    mode: Mode,

    /// Address to serve game connections on
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to serve game connections on
    #[arg(short, long, default_value = "5555")]
    port: u16,

    /// State broadcast period in milliseconds
    #[arg(short, long, default_value = "100")]
    broadcast_ms: u64,

    /// Where to send heartbeats [default: 127.0.0.1:5556 for primary, 127.0.0.1:5557 for standby]
    #[arg(long)]
    heartbeat_peer: Option<SocketAddr>,

    /// Where a standby listens for heartbeats
    #[arg(long, default_value = "127.0.0.1:5556")]
    heartbeat_listen: SocketAddr,

    /// Heartbeat period in milliseconds
    #[arg(long, default_value = "1000")]
    heartbeat_ms: u64,

    /// Missed heartbeat periods before a standby takes over
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MULTIPLIER)]
    failover_multiplier: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let bind_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let serve = ServerConfig {
        bind_addr,
        broadcast_interval: Duration::from_millis(args.broadcast_ms),
    };
    let heartbeat_interval = Duration::from_millis(args.heartbeat_ms);
    let events: Arc<dyn EventSink> = Arc::new(LogEventSink);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut task = match args.mode {
        Mode::Primary => {
            let peer_addr = args
                .heartbeat_peer
                .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], DEFAULT_HEARTBEAT_PORT)));
            let server = Server::bind(serve, events).await?;
            info!("Starting primary on {}", server.local_addr()?);

            spawn_heartbeat_sender(
                HeartbeatConfig {
                    peer_addr,
                    interval: heartbeat_interval,
                },
                shutdown_rx.clone(),
            );
            tokio::spawn(server.run(shutdown_rx))
        }
        Mode::Standby => {
            let peer_addr = args
                .heartbeat_peer
                .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], DEFAULT_STANDBY_PEER_PORT)));
            let supervisor = Supervisor::bind(
                FailoverConfig {
                    listen_addr: args.heartbeat_listen,
                    peer_addr,
                    serve,
                    heartbeat_interval,
                    timeout_multiplier: args.failover_multiplier,
                },
                events,
            )
            .await?;
            info!("Starting standby, will serve on {} after failover", bind_addr);
            tokio::spawn(supervisor.run(shutdown_rx))
        }
    };

    // Handle shutdown gracefully
    tokio::select! {
        result = &mut task => {
            match result {
                Ok(Ok(())) => info!("Server stopped"),
                Ok(Err(e)) => error!("Server failed: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
            }
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    shutdown_tx.send_replace(true);
    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Server failed during shutdown: {}", e),
        Err(e) => error!("Server task panicked: {}", e),
    }
    Ok(())
}
