//! Scripted probe that speaks the wire protocol against a running server.
//!
//! Joins under a name, creates a room, asks for a lobby refresh and prints every frame
//! that arrives until the listen window closes.

use clap::Parser;
use log::info;
use serde_json::Value;
use shared::codec::{read_message, write_message};
use shared::ClientMessage;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    server: String,

    /// Display name to join with
    #[arg(short, long, default_value = "Probe")]
    name: String,

    /// Name of the room to create
    #[arg(short, long, default_value = "Probe Room")]
    room: String,

    /// How long to keep printing incoming frames, in seconds
    #[arg(short, long, default_value = "3")]
    listen_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let stream = TcpStream::connect(&args.server).await?;
    info!("Connected to {}", args.server);
    let (mut reader, mut writer) = stream.into_split();

    let script = [
        ClientMessage::Join {
            name: args.name.clone(),
        },
        ClientMessage::CreateRoom {
            name: Some(args.room.clone()),
        },
        ClientMessage::RefreshLobby,
    ];
    for message in &script {
        info!("Sending {}", message.kind());
        write_message(&mut writer, message).await?;
    }

    let deadline = Instant::now() + Duration::from_secs(args.listen_secs);
    let mut received = 0usize;
    loop {
        match timeout_at(deadline, read_message::<_, Value>(&mut reader)).await {
            Ok(Ok(Some(frame))) => {
                received += 1;
                println!("{}", frame);
            }
            Ok(Ok(None)) => {
                info!("Server closed the connection");
                break;
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => break,
        }
    }

    info!("Received {} frames", received);
    Ok(())
}
