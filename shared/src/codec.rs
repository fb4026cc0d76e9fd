//! Length-prefixed JSON framing.
//!
//! A frame is a fixed-width ASCII header holding the decimal byte length of the body,
//! left-justified and space-padded to [`HEADER_LENGTH`], followed by the UTF-8 JSON body.

use crate::{HEADER_LENGTH, MAX_FRAME_SIZE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid frame header: {0:?}")]
    Framing(String),

    #[error("invalid JSON body: {0}")]
    Protocol(#[source] serde_json::Error),

    #[error("stream ended mid-frame: need={need} have={have}")]
    Truncated { need: usize, have: usize },

    #[error("frame exceeds maximum size: len={len} max={max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serializes `message` and prefixes it with its length header.
///
/// Only incoming frames are held to [`MAX_FRAME_SIZE`]; outgoing ones are not capped.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_vec(message).map_err(CodecError::Encode)?;
    let header = format!("{:<width$}", body.len(), width = HEADER_LENGTH);
    let mut frame = Vec::with_capacity(HEADER_LENGTH + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Parses a header into the body length it announces.
pub fn parse_header(header: &[u8]) -> Result<usize, CodecError> {
    let text = std::str::from_utf8(header)
        .map_err(|_| CodecError::Framing(String::from_utf8_lossy(header).into_owned()))?;

    let len = text
        .trim()
        .parse::<usize>()
        .map_err(|_| CodecError::Framing(text.to_string()))?;

    if len > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            len,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(len)
}

/// Reads one frame from a stream.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly on a frame boundary.
/// A stream that ends inside a header or body is reported as [`CodecError::Truncated`].
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, CodecError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; HEADER_LENGTH];
    let mut filled = 0;
    while filled < HEADER_LENGTH {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(CodecError::Truncated {
                need: HEADER_LENGTH,
                have: filled,
            });
        }
        filled += n;
    }

    let len = parse_header(&header)?;
    let mut body = vec![0u8; len];
    let mut have = 0;
    while have < len {
        let n = reader.read(&mut body[have..]).await?;
        if n == 0 {
            return Err(CodecError::Truncated { need: len, have });
        }
        have += n;
    }

    serde_json::from_slice(&body)
        .map(Some)
        .map_err(CodecError::Protocol)
}

/// Tries to take one complete frame off the front of `buf`.
///
/// `Ok(None)` means no whole frame is buffered yet; the bytes stay in place.
pub fn try_decode<T: DeserializeOwned>(buf: &mut Vec<u8>) -> Result<Option<T>, CodecError> {
    if buf.len() < HEADER_LENGTH {
        return Ok(None);
    }

    let len = parse_header(&buf[..HEADER_LENGTH])?;
    let need = HEADER_LENGTH + len;
    if buf.len() < need {
        return Ok(None);
    }

    let frame: Vec<u8> = buf.drain(..need).collect();
    serde_json::from_slice(&frame[HEADER_LENGTH..])
        .map(Some)
        .map_err(CodecError::Protocol)
}

/// Encodes and writes a whole frame, flushing afterwards.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientMessage, ServerMessage};
    use serde_json::{json, Value};
    use tokio_test::io::Builder;

    #[test]
    fn test_header_is_left_justified_and_padded() {
        let frame = encode(&json!({"type": "end_turn"})).unwrap();
        let body = br#"{"type":"end_turn"}"#;
        assert_eq!(&frame[..HEADER_LENGTH], b"19        ");
        assert_eq!(&frame[HEADER_LENGTH..], &body[..]);
    }

    #[test]
    fn test_header_counts_utf8_bytes() {
        let frame = encode(&json!({"text": "é"})).unwrap();
        let len = parse_header(&frame[..HEADER_LENGTH]).unwrap();
        assert_eq!(len, frame.len() - HEADER_LENGTH);
        assert_eq!(len, r#"{"text":"é"}"#.len());
    }

    #[test]
    fn test_parse_header_rejects_non_numeric() {
        match parse_header(b"abc       ") {
            Err(CodecError::Framing(text)) => assert_eq!(text, "abc       "),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            parse_header(b"          "),
            Err(CodecError::Framing(_))
        ));
    }

    #[test]
    fn test_parse_header_rejects_oversized_frames() {
        let header = format!("{:<10}", MAX_FRAME_SIZE + 1);
        assert!(matches!(
            parse_header(header.as_bytes()),
            Err(CodecError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_message_roundtrip() {
        let msg = ServerMessage::GuessFeedback {
            message: "Word not found on the board. Your turn ends.".to_string(),
            guess: Some("PLUTO".to_string()),
            clue: "SPACE".to_string(),
            team: None,
            turn: None,
        };
        let frame = encode(&msg).unwrap();
        let mut reader = Builder::new().read(&frame).build();

        let decoded: Option<ServerMessage> = read_message(&mut reader).await.unwrap();
        assert_eq!(decoded, Some(msg));
    }

    #[tokio::test]
    async fn test_read_message_handles_split_reads() {
        let frame = encode(&ClientMessage::Guess {
            word: "apple".to_string(),
        })
        .unwrap();
        let mut reader = Builder::new()
            .read(&frame[..4])
            .read(&frame[4..13])
            .read(&frame[13..20])
            .read(&frame[20..])
            .build();

        let decoded: Option<ClientMessage> = read_message(&mut reader).await.unwrap();
        assert_eq!(
            decoded,
            Some(ClientMessage::Guess {
                word: "apple".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_read_message_reports_clean_close() {
        let mut reader = Builder::new().build();
        let decoded: Option<Value> = read_message(&mut reader).await.unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn test_read_message_reports_truncated_body() {
        let frame = encode(&json!({"type": "chat", "text": "hello there"})).unwrap();
        let mut reader = Builder::new().read(&frame[..frame.len() - 3]).build();

        match read_message::<_, Value>(&mut reader).await {
            Err(CodecError::Truncated { need, have }) => assert!(need > have),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_message_reports_truncated_header() {
        let mut reader = Builder::new().read(b"12").build();
        assert!(matches!(
            read_message::<_, Value>(&mut reader).await,
            Err(CodecError::Truncated { need: HEADER_LENGTH, have: 2 })
        ));
    }

    #[tokio::test]
    async fn test_read_message_rejects_invalid_json() {
        let mut reader = Builder::new().read(b"5         {nope").build();
        assert!(matches!(
            read_message::<_, Value>(&mut reader).await,
            Err(CodecError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_read_message_rejects_bad_header() {
        let mut reader = Builder::new().read(b"hello!!!!!").build();
        assert!(matches!(
            read_message::<_, Value>(&mut reader).await,
            Err(CodecError::Framing(_))
        ));
    }

    #[test]
    fn test_try_decode_incremental() {
        let frame = encode(&json!({"type": "refresh_lobby"})).unwrap();
        let mut buf = Vec::new();

        buf.extend_from_slice(&frame[..5]);
        assert!(try_decode::<Value>(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[5..HEADER_LENGTH + 3]);
        assert!(try_decode::<Value>(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&frame[HEADER_LENGTH + 3..]);
        let decoded = try_decode::<Value>(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, json!({"type": "refresh_lobby"}));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_try_decode_leaves_following_frame_buffered() {
        let mut buf = encode(&json!({"n": 1})).unwrap();
        buf.extend(encode(&json!({"n": 2})).unwrap());

        let first = try_decode::<Value>(&mut buf).unwrap().unwrap();
        assert_eq!(first, json!({"n": 1}));
        let second = try_decode::<Value>(&mut buf).unwrap().unwrap();
        assert_eq!(second, json!({"n": 2}));
        assert!(try_decode::<Value>(&mut buf).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_message_emits_one_frame() {
        let msg = ServerMessage::error("Room not found.");
        let frame = encode(&msg).unwrap();
        let mut writer = Builder::new().write(&frame).build();
        write_message(&mut writer, &msg).await.unwrap();
    }

    #[test]
    fn test_encode_does_not_cap_outgoing_frames() {
        let msg = ServerMessage::error("x".repeat(MAX_FRAME_SIZE + 1));
        let frame = encode(&msg).unwrap();
        // A reader still refuses it, so callers must bound what they send.
        let err = parse_header(&frame[..HEADER_LENGTH]).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { .. }));
        assert!(frame.len() > MAX_FRAME_SIZE + HEADER_LENGTH);
    }
}
