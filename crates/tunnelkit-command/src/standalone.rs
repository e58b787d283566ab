//! One-shot administrative client

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::UnixStream;

use crate::error::ChannelError;
use crate::protocol::{read_frame, write_frame, Command, Frame, Request};

/// How long to wait for the server's reply
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends `reload`, `stop` and `close_connections`
#[derive(Debug, Clone)]
pub struct StandaloneClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl StandaloneClient {
    #[must_use]
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            timeout: RESPONSE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// # Errors
    /// Returns the server's message as `Rejected`, or a transport error
    pub async fn reload(&self) -> Result<(), ChannelError> {
        self.send(Command::Reload).await
    }

    /// # Errors
    /// Returns the server's message as `Rejected`, or a transport error
    pub async fn stop(&self) -> Result<(), ChannelError> {
        self.send(Command::Stop).await
    }

    /// # Errors
    /// Returns the server's message as `Rejected`, or a transport error
    pub async fn close_connections(&self) -> Result<(), ChannelError> {
        self.send(Command::CloseConnections).await
    }

    /// Send one administrative command and wait for its reply
    ///
    /// # Errors
    /// Returns `Protocol` for subscription commands, `Transport` if the
    /// server is unreachable or silent, `Rejected` with the server's message
    pub async fn send(&self, command: Command) -> Result<(), ChannelError> {
        if command.is_subscription() {
            return Err(ChannelError::Protocol(format!(
                "{command:?} is a subscription"
            )));
        }

        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            ChannelError::Transport(format!(
                "Failed to connect to command socket at {}: {e}. Is the tunnel running?",
                self.socket_path.display()
            ))
        })?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        write_frame(&mut writer, &Request::new(command)).await?;

        let reply = tokio::time::timeout(self.timeout, read_frame::<_, Frame>(&mut reader))
            .await
            .map_err(|_| ChannelError::Transport("Timeout waiting for response".into()))??;

        match reply {
            Some(Frame::Ok) => Ok(()),
            Some(Frame::Error { message }) => Err(ChannelError::Rejected(message)),
            Some(other) => Err(ChannelError::Protocol(format!(
                "unexpected response: {other:?}"
            ))),
            None => Err(ChannelError::Transport(
                "connection closed before a response".into(),
            )),
        }
    }
}
