//! Wire format: one JSON object per line
//!
//! The client writes a single [`Request`]. For subscriptions the server
//! answers [`Frame::Accepted`] and then streams frames until either side
//! closes; administrative commands get exactly one `ok` or `error` frame.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ChannelError;

/// What a connection asks the server for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Periodic status snapshots
    Status,
    /// Status snapshots as the engine produces them
    RawStatus,
    /// Log lines, backlog first
    Log,
    /// Restart the tunnel
    Reload,
    /// Stop the tunnel
    Stop,
    /// Drop every live downstream connection
    CloseConnections,
}

impl Command {
    /// Whether the connection stays open as a stream
    #[must_use]
    pub fn is_subscription(self) -> bool {
        matches!(self, Self::Status | Self::RawStatus | Self::Log)
    }
}

/// First and only frame a client sends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub command: Command,
    /// Status cadence; the server default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
}

impl Request {
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            interval_ms: None,
        }
    }
}

/// Snapshot of the running engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Resident memory in bytes
    pub memory: u64,
    /// Runtime worker threads
    pub workers: u32,
    /// Live downstream connections
    pub connections: u32,
}

/// Frames sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Subscription handshake
    Accepted,
    Status(StatusMessage),
    Log { message: String },
    /// Administrative command succeeded
    Ok,
    Error { message: String },
}

/// Write one value as a JSON line
///
/// # Errors
/// Returns `Protocol` if the value cannot be encoded, `Transport` on I/O failure
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value).map_err(|e| ChannelError::Protocol(e.to_string()))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one JSON line, or `None` at end of stream
///
/// # Errors
/// Returns `Protocol` for a malformed line, `Transport` on I/O failure
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, ChannelError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    serde_json::from_str(line.trim())
        .map(Some)
        .map_err(|e| ChannelError::Protocol(format!("invalid frame: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let json = serde_json::to_string(&Request::new(Command::CloseConnections)).unwrap();
        assert_eq!(json, r#"{"command":"close_connections"}"#);

        let parsed: Request = serde_json::from_str(r#"{"command":"status","interval_ms":500}"#).unwrap();
        assert_eq!(parsed.command, Command::Status);
        assert_eq!(parsed.interval_ms, Some(500));
    }

    #[test]
    fn test_frame_wire_shape() {
        let status = Frame::Status(StatusMessage {
            memory: 1024,
            workers: 4,
            connections: 2,
        });
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            r#"{"type":"status","memory":1024,"workers":4,"connections":2}"#
        );
        assert_eq!(
            serde_json::to_string(&Frame::Accepted).unwrap(),
            r#"{"type":"accepted"}"#
        );
    }

    #[test]
    fn test_subscription_commands() {
        assert!(Command::Log.is_subscription());
        assert!(!Command::Reload.is_subscription());
    }

    #[tokio::test]
    async fn test_read_frame_eof_and_garbage() {
        let mut empty: &[u8] = b"";
        let frame: Option<Frame> = read_frame(&mut empty).await.unwrap();
        assert!(frame.is_none());

        let mut garbage: &[u8] = b"not json\n";
        let err = read_frame::<_, Frame>(&mut garbage).await.unwrap_err();
        assert!(matches!(err, ChannelError::Protocol(_)));
    }
}
