//! Per-connection task: frame decoding on the read half, a queue-fed writer on the other.
//!
//! The read loop decodes one frame at a time and hands it to the registry. Everything the
//! server sends to this peer goes through the session's outbound queue and is written by a
//! single writer task, so concurrent senders can never split a frame. Whatever ends the
//! connection (peer close, decode failure, write failure or shutdown), the session is
//! removed from the registry exactly once.

use crate::network::shutdown_signalled;
use crate::registry::{SessionId, SessionRegistry};
use log::{debug, info, warn};
use serde_json::Value;
use shared::codec::{encode, read_message, CodecError};
use shared::{ClientMessage, ServerMessage};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

/// How long queued replies may take to flush once the session is gone.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum Close {
    PeerClosed,
    Decode(CodecError),
    WriterFailed,
    Shutdown,
}

/// Serves one accepted connection until it closes.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: SessionRegistry,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }
    let (mut reader, writer) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let id = registry.register(addr, outbound_tx).await;
    let mut writer_task = tokio::spawn(write_loop(id, writer, outbound_rx));

    let close = loop {
        tokio::select! {
            frame = read_message::<_, Value>(&mut reader) => match frame {
                Ok(Some(value)) => handle_frame(&registry, id, value).await,
                Ok(None) => break Close::PeerClosed,
                Err(e) => break Close::Decode(e),
            },
            _ = &mut writer_task => break Close::WriterFailed,
            _ = shutdown_signalled(&mut shutdown) => break Close::Shutdown,
        }
    };

    match &close {
        Close::PeerClosed => info!("Session {} ({}) closed the connection", id, addr),
        Close::Decode(e) => warn!("Dropping session {} ({}): {}", id, addr, e),
        Close::WriterFailed => warn!("Dropping session {} ({}): write failed", id, addr),
        Close::Shutdown => debug!("Closing session {} ({}) for shutdown", id, addr),
    }

    // Removing the session drops the last queue sender, which lets the writer finish.
    registry.remove(id).await;
    if !matches!(close, Close::WriterFailed)
        && timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task).await.is_err()
    {
        writer_task.abort();
    }
}

async fn handle_frame(registry: &SessionRegistry, id: SessionId, value: Value) {
    match ClientMessage::from_value(value) {
        Ok(message) => registry.dispatch(id, message).await,
        Err(e) => {
            debug!("Malformed request from session {}: {}", id, e);
            registry
                .send_to(id, ServerMessage::error(format!("Malformed message: {}", e)))
                .await;
        }
    }
}

async fn write_loop<W>(
    id: SessionId,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<ServerMessage>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let frame = match encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping unencodable message for session {}: {}", id, e);
                continue;
            }
        };
        if let Err(e) = write_frame(&mut writer, &frame).await {
            warn!("Failed to send to session {}: {}", id, e);
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!("Failed to shut down writer for session {}: {}", id, e);
    }
}

async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventSink;
    use shared::codec::encode;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_one() -> (TcpStream, SessionRegistry, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = SessionRegistry::new(Arc::new(NullEventSink));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let task = tokio::spawn(handle_connection(stream, peer, registry.clone(), shutdown_rx));
        (client, registry, shutdown_tx, task)
    }

    async fn next(client: &mut TcpStream) -> ServerMessage {
        timeout(Duration::from_secs(2), read_message(client))
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_writer_emits_queued_frames_in_order() {
        let first = ServerMessage::RoomLeft;
        let second = ServerMessage::error("Room not found.");
        let writer = tokio_test::io::Builder::new()
            .write(&encode(&first).unwrap())
            .write(&encode(&second).unwrap())
            .build();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(first).unwrap();
        tx.send(second).unwrap();
        drop(tx);
        write_loop(SessionId::new(1), writer, rx).await;
    }

    #[tokio::test]
    async fn test_requests_are_dispatched() {
        let (mut client, registry, _shutdown, _task) = serve_one().await;
        let frame = encode(&ClientMessage::Join { name: "Alice".to_string() }).unwrap();
        client.write_all(&frame).await.unwrap();

        match next(&mut client).await {
            ServerMessage::LobbyUpdate { players, .. } => {
                assert_eq!(players, vec!["Alice".to_string()]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_malformed_request_keeps_connection() {
        let (mut client, registry, _shutdown, _task) = serve_one().await;
        let frame = encode(&serde_json::json!({"type": "join"})).unwrap();
        client.write_all(&frame).await.unwrap();

        match next(&mut client).await {
            ServerMessage::Error { message } => assert!(message.starts_with("Malformed message")),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_bad_header_drops_session() {
        let (mut client, registry, _shutdown, task) = serve_one().await;
        client.write_all(b"not-a-len!{}").await.unwrap();

        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert_eq!(registry.session_count().await, 0);

        let mut buf = [0u8; 16];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_peer_close_drops_session() {
        let (client, registry, _shutdown, task) = serve_one().await;
        drop(client);

        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_connection() {
        let (_client, registry, shutdown, task) = serve_one().await;
        shutdown.send(true).unwrap();

        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert_eq!(registry.session_count().await, 0);
    }
}
