//! tunnelkit command channel
//!
//! A Unix socket carrying newline-delimited JSON between the privileged
//! tunnel process ([`CommandServer`]) and any number of observers. Each
//! connection holds one subscription (`status`, `raw_status`, `log`) for its
//! lifetime, or sends one administrative command and reads a single reply.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

pub mod client;
pub mod error;
pub mod history;
pub mod protocol;
pub mod server;
pub mod standalone;

pub use client::{ClientHandler, CommandClient, CLOSED_BY_SERVER, CONNECT_ATTEMPTS, RETRY_DELAY};
pub use error::ChannelError;
pub use history::{LogHistory, LOG_HISTORY_LIMIT};
pub use protocol::{Command, Frame, Request, StatusMessage};
pub use server::{
    CommandServer, LogSink, MessageSink, ServerHandler, StatusProvider, LOG_BACKLOG_LIMIT,
};
pub use standalone::{StandaloneClient, RESPONSE_TIMEOUT};
