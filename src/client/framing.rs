//! LSP message framing layer
//!
//! Turns a raw byte stream into discrete JSON-RPC messages and back using
//! the Content-Length envelope specified by the Language Server Protocol:
//!
//! `Content-Length: <length>\r\n\r\n<content>`
//!
//! The reader never yields a partial message: it suspends until a complete
//! frame is available or the stream closes. A clean close before any header
//! is seen is end-of-stream (`Ok(None)`), not an error.

use crate::client::protocol::{Message, MessageShapeError};
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

/// Maximum payload size, guarding against a corrupt length value
/// exhausting memory.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Error types for message framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("malformed JSON payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    #[error("invalid message: {0}")]
    InvalidMessage(#[from] MessageShapeError),

    #[error("failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),
}

// ============================================================================
// Frame Reader
// ============================================================================

/// Decodes framed messages from any async byte source.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Read the next complete message from the stream.
    ///
    /// Header lines other than `Content-Length` (e.g. `Content-Type`) are
    /// tolerated and skipped, per the LSP header-section convention.
    /// Returns `Ok(None)` when the stream closes before a header is seen.
    pub async fn read(&mut self) -> Result<Option<Message>, FramingError> {
        let mut line = String::new();
        let mut content_length: Option<usize> = None;

        let length = loop {
            line.clear();
            let read = self.reader.read_line(&mut line).await?;
            if read == 0 {
                return match content_length {
                    None => Ok(None),
                    Some(_) => Err(FramingError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream closed inside a message header section",
                    ))),
                };
            }

            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                // Blank separator terminates the header section once a
                // length is known; a stray blank line earlier is skipped.
                if let Some(length) = content_length {
                    break length;
                }
                continue;
            }

            if let Some(value) = trimmed.strip_prefix("Content-Length:") {
                let value = value.trim();
                let length = value
                    .parse::<usize>()
                    .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?;
                if length > MAX_MESSAGE_SIZE {
                    return Err(FramingError::MessageTooLarge {
                        size: length,
                        max: MAX_MESSAGE_SIZE,
                    });
                }
                content_length = Some(length);
            }
            // Any other header line is skipped.
        };

        let mut payload = vec![0u8; length];
        self.reader.read_exact(&mut payload).await?;
        trace!("read complete frame ({length} bytes)");

        let value: serde_json::Value =
            serde_json::from_slice(&payload).map_err(FramingError::MalformedPayload)?;
        Ok(Some(Message::from_value(value)?))
    }
}

// ============================================================================
// Frame Writer
// ============================================================================

/// Encodes messages onto any async byte sink.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize `message` to canonical JSON and write it with its
    /// Content-Length header. No trailing delimiter.
    pub async fn write(&mut self, message: &Message) -> Result<(), FramingError> {
        let payload = serde_json::to_vec(message).map_err(FramingError::Serialize)?;
        let header = format!("Content-Length: {}\r\n\r\n", payload.len());

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;
        trace!("wrote frame ({} bytes content)", payload.len());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::protocol::Request;
    use serde_json::json;
    use std::io::Cursor;

    fn frame(payload: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", payload.len(), payload).into_bytes()
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let message = Message::Request(Request::new(1, "initialize", Some(json!({"a": 1}))));

        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        writer.write(&message).await.unwrap();
        let bytes = writer.writer.into_inner();

        let mut reader = FrameReader::new(Cursor::new(bytes));
        let Message::Request(decoded) = reader.read().await.unwrap().unwrap() else {
            panic!("expected request");
        };
        assert_eq!(decoded.id, json!(1));
        assert_eq!(decoded.method, "initialize");
        assert_eq!(decoded.params, Some(json!({"a": 1})));

        // Nothing follows the single frame.
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_multiple_back_to_back_frames() {
        let mut bytes = frame(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#);
        bytes.extend(frame(r#"{"jsonrpc":"2.0","id":2,"result":null}"#));

        let mut reader = FrameReader::new(Cursor::new(bytes));
        let first = reader.read().await.unwrap().unwrap();
        let second = reader.read().await.unwrap().unwrap();
        assert!(matches!(first, Message::Response(ref r) if r.is_for(1)));
        assert!(matches!(second, Message::Response(ref r) if r.is_for(2)));
    }

    #[tokio::test]
    async fn test_foreign_headers_are_skipped() {
        let payload = r#"{"jsonrpc":"2.0","method":"initialized"}"#;
        let bytes = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nContent-Length: {}\r\nX-Custom: yes\r\n\r\n{}",
            payload.len(),
            payload
        );

        let mut reader = FrameReader::new(Cursor::new(bytes.into_bytes()));
        let message = reader.read().await.unwrap().unwrap();
        assert_eq!(message.method(), Some("initialized"));
    }

    #[tokio::test]
    async fn test_eof_before_header_is_end_of_stream() {
        let mut reader = FrameReader::new(Cursor::new(Vec::new()));
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_body_is_an_error() {
        let mut bytes = frame(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#);
        bytes.truncate(bytes.len() - 5);

        let mut reader = FrameReader::new(Cursor::new(bytes));
        match reader.read().await {
            Err(FramingError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected unexpected-eof, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_content_length() {
        let bytes = b"Content-Length: banana\r\n\r\n{}".to_vec();
        let mut reader = FrameReader::new(Cursor::new(bytes));
        match reader.read().await {
            Err(FramingError::InvalidContentLength(value)) => assert_eq!(value, "banana"),
            other => panic!("expected invalid content length, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_content_length() {
        let bytes = format!("Content-Length: {}\r\n\r\n", MAX_MESSAGE_SIZE + 1).into_bytes();
        let mut reader = FrameReader::new(Cursor::new(bytes));
        match reader.read().await {
            Err(FramingError::MessageTooLarge { size, max }) => {
                assert_eq!(size, MAX_MESSAGE_SIZE + 1);
                assert_eq!(max, MAX_MESSAGE_SIZE);
            }
            other => panic!("expected message-too-large, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_json_payload() {
        let bytes = frame("{not json");
        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.read().await,
            Err(FramingError::MalformedPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_partial_body_delivered_across_writes() {
        let payload = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        let framed = frame(payload);
        let split_at = framed.len() - 10;

        let (client, mut server) = tokio::io::duplex(256);
        let mut reader = FrameReader::new(client);

        let framed_clone = framed.clone();
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            server.write_all(&framed_clone[..split_at]).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            server.write_all(&framed_clone[split_at..]).await.unwrap();
        });

        let message = reader.read().await.unwrap().unwrap();
        assert!(matches!(message, Message::Response(ref r) if r.is_for(1)));
        writer.await.unwrap();
    }
}
