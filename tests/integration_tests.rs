//! Integration tests for the session server
//!
//! These tests run real servers on loopback sockets and talk to them through the wire codec.

use server::config::{FailoverConfig, ServerConfig};
use server::events::NullEventSink;
use server::failover::{Supervisor, SupervisorState};
use server::network::Server;
use shared::codec::{encode, read_message, write_message};
use shared::{ClientMessage, ServerMessage, Team, HEARTBEAT_TOKEN};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::time::{timeout, Instant};

const WAIT: Duration = Duration::from_secs(3);

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn start_server() -> (SocketAddr, watch::Sender<bool>) {
    let config = ServerConfig {
        bind_addr: loopback(),
        broadcast_interval: Duration::from_millis(20),
    };
    let server = Server::bind(config, Arc::new(NullEventSink)).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.run(shutdown_rx));
    (addr, shutdown_tx)
}

async fn send(stream: &mut TcpStream, message: ClientMessage) {
    write_message(stream, &message).await.unwrap();
}

/// Reads frames until one satisfies `wanted`, failing if none does in time.
async fn expect<F>(stream: &mut TcpStream, mut wanted: F) -> ServerMessage
where
    F: FnMut(&ServerMessage) -> bool,
{
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let message: ServerMessage = timeout(remaining, read_message(stream))
            .await
            .expect("timed out waiting for frame")
            .unwrap()
            .expect("server closed the connection");
        if wanted(&message) {
            return message;
        }
    }
}

async fn joined(addr: SocketAddr, name: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    send(&mut stream, ClientMessage::Join { name: name.to_string() }).await;
    let expected = name.to_string();
    expect(&mut stream, |m| {
        matches!(m, ServerMessage::LobbyUpdate { players, .. } if players.contains(&expected))
    })
    .await;
    stream
}

/// LOBBY AND ROOM FLOW OVER TCP
mod session_tests {
    use super::*;

    /// Tests that a taken name is refused without renaming
    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let (addr, _shutdown) = start_server().await;
        let _alice = joined(addr, "Alice").await;
        let mut other = TcpStream::connect(addr).await.unwrap();

        send(&mut other, ClientMessage::Join { name: "Alice".to_string() }).await;
        let reply = expect(&mut other, |m| matches!(m, ServerMessage::Error { .. })).await;
        assert_eq!(
            reply,
            ServerMessage::error("Username 'Alice' is already taken. Please choose another.")
        );
    }

    /// Tests a complete room setup through to the first per-player game views
    #[tokio::test]
    async fn two_players_start_a_game() {
        let (addr, _shutdown) = start_server().await;
        let mut alice = joined(addr, "Alice").await;
        let mut bob = joined(addr, "Bob").await;

        send(&mut alice, ClientMessage::CreateRoom { name: Some("Den".to_string()) }).await;
        let room_id = match expect(&mut alice, |m| matches!(m, ServerMessage::RoomCreated { .. })).await {
            ServerMessage::RoomCreated { room_id, name, .. } => {
                assert_eq!(name, "Den");
                room_id
            }
            _ => unreachable!(),
        };

        // Bob sees the room in the lobby before joining it.
        let expected = room_id.clone();
        expect(&mut bob, |m| {
            matches!(m, ServerMessage::LobbyUpdate { rooms, .. } if rooms.iter().any(|r| r.id == expected && r.owner == "Alice"))
        })
        .await;

        send(&mut bob, ClientMessage::JoinRoom { room_id: room_id.clone() }).await;
        expect(&mut bob, |m| matches!(m, ServerMessage::RoomJoined { .. })).await;

        send(&mut alice, ClientMessage::SetTeam { team: "red".to_string() }).await;
        expect(&mut alice, |m| *m == ServerMessage::TeamSetAck { team: Team::Red }).await;
        send(&mut bob, ClientMessage::SetTeam { team: "blue".to_string() }).await;
        expect(&mut bob, |m| *m == ServerMessage::TeamSetAck { team: Team::Blue }).await;

        send(&mut alice, ClientMessage::StartGameRequest).await;
        expect(&mut alice, |m| matches!(m, ServerMessage::GameStartAck { .. })).await;

        for (stream, team) in [(&mut alice, Team::Red), (&mut bob, Team::Blue)] {
            match expect(stream, |m| matches!(m, ServerMessage::GameStateUpdate(_))).await {
                ServerMessage::GameStateUpdate(view) => {
                    assert_eq!(view.board.len(), 25);
                    assert_eq!(view.my_team, Some(team));
                    assert!(view.is_spymaster);
                    assert!(view.board.iter().all(|c| c.color.is_some()));
                    assert_eq!(view.red_score, 8);
                    assert_eq!(view.blue_score, 8);
                    assert!(!view.game_over);
                }
                _ => unreachable!(),
            }
        }
    }

    /// Tests that a disconnect is announced to the lobby and cleans up the room
    #[tokio::test]
    async fn disconnect_is_announced() {
        let (addr, _shutdown) = start_server().await;
        let mut alice = joined(addr, "Alice").await;
        let mut bob = joined(addr, "Bob").await;

        send(&mut bob, ClientMessage::CreateRoom { name: None }).await;
        expect(&mut bob, |m| matches!(m, ServerMessage::RoomCreated { .. })).await;
        drop(bob);

        expect(&mut alice, |m| match m {
            ServerMessage::LobbyUpdate { players, rooms, chat } => {
                players == &vec!["Alice".to_string()]
                    && rooms.is_empty()
                    && chat.contains(&"[SYSTEM] Bob disconnected from the server.".to_string())
            }
            _ => false,
        })
        .await;
    }

    /// Tests that a bad frame header ends the connection
    #[tokio::test]
    async fn bad_header_closes_connection() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (addr, _shutdown) = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"abcdefghij{}").await.unwrap();

        let mut buf = vec![0u8; 4096];
        let closed = timeout(WAIT, async {
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok());
    }

    /// Tests that a flood of long chat lines does not drop other lobby players
    #[tokio::test]
    async fn long_chat_keeps_lobby_connected() {
        let (addr, _shutdown) = start_server().await;
        let mut talker = joined(addr, "Talker").await;
        let mut bystander = joined(addr, "Bystander").await;

        for _ in 0..6 {
            send(&mut talker, ClientMessage::Chat { text: "x".repeat(200_000) }).await;
        }

        // Several broadcast ticks after the last line, the bystander is still served.
        for _ in 0..5 {
            match expect(&mut bystander, |m| matches!(m, ServerMessage::LobbyUpdate { .. })).await {
                ServerMessage::LobbyUpdate { players, chat, .. } => {
                    assert!(players.contains(&"Bystander".to_string()));
                    assert!(chat.iter().all(|l| l.len() <= shared::MAX_CHAT_LINE_CHARS));
                }
                _ => unreachable!(),
            }
        }
        send(&mut bystander, ClientMessage::RefreshLobby).await;
        expect(&mut bystander, |m| {
            matches!(m, ServerMessage::LobbyUpdate { chat, .. } if chat.iter().filter(|l| l.starts_with("Talker: ")).count() == 6)
        })
        .await;
    }

    /// Tests that frames split across writes are reassembled
    #[tokio::test]
    async fn split_frames_are_reassembled() {
        use tokio::io::AsyncWriteExt;

        let (addr, _shutdown) = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let frame = encode(&ClientMessage::Join { name: "Slow".to_string() }).unwrap();
        for chunk in frame.chunks(3) {
            stream.write_all(chunk).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        expect(&mut stream, |m| {
            matches!(m, ServerMessage::LobbyUpdate { players, .. } if players.contains(&"Slow".to_string()))
        })
        .await;
    }
}

/// STANDBY PROMOTION OVER UDP
mod failover_tests {
    use super::*;

    /// Tests that a silent primary leads to promotion, serving and fresh heartbeats
    #[tokio::test]
    async fn standby_takes_over_after_silence() {
        let peer = UdpSocket::bind(loopback()).await.unwrap();
        let config = FailoverConfig {
            listen_addr: loopback(),
            peer_addr: peer.local_addr().unwrap(),
            serve: ServerConfig {
                bind_addr: loopback(),
                broadcast_interval: Duration::from_millis(20),
            },
            heartbeat_interval: Duration::from_millis(25),
            timeout_multiplier: 4,
        };
        let supervisor = Supervisor::bind(config, Arc::new(NullEventSink)).await.unwrap();
        let mut state = supervisor.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(supervisor.run(shutdown_rx));

        timeout(WAIT, state.changed()).await.unwrap().unwrap();
        let serving = match *state.borrow() {
            SupervisorState::Active { serving } => serving,
            SupervisorState::Standby => panic!("supervisor did not promote"),
        };

        let mut buf = [0u8; 64];
        let (len, _) = timeout(WAIT, peer.recv_from(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf[..len], HEARTBEAT_TOKEN);

        // The promoted instance is a full server.
        let _player = joined(serving, "Survivor").await;

        shutdown_tx.send(true).unwrap();
        timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
    }
}
