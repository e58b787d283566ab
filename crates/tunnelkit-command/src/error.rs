//! Error types for the command channel

use thiserror::Error;

/// Errors on either end of the command channel
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Socket connect, read or write failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server answered with an error; the message is the server's
    #[error("{0}")]
    Rejected(String),

    /// The caller cancelled while connecting
    #[error("Connection cancelled")]
    Cancelled,

    /// Every connection attempt failed
    #[error("Failed to connect after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl ChannelError {
    /// Get the error code for CLI responses
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Rejected(_) => "REJECTED",
            Self::Cancelled => "CANCELLED",
            Self::Exhausted { .. } => "CONNECT_EXHAUSTED",
        }
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
