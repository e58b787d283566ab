//! Command channel server
//!
//! Runs in the tunnel process. Every accepted connection is served by its own
//! task, so a slow or closed observer never affects the others.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ChannelError;
use crate::protocol::{read_frame, write_frame, Command, Frame, Request, StatusMessage};

/// Log lines kept for replay to new `log` subscribers
pub const LOG_BACKLOG_LIMIT: usize = 100;

const BROADCAST_CAPACITY: usize = 256;

/// Receives the administrative commands
#[async_trait]
pub trait ServerHandler: Send + Sync {
    /// # Errors
    /// Returns a message that is sent back to the requesting client
    async fn reload(&self) -> Result<(), String>;

    /// # Errors
    /// Returns a message that is sent back to the requesting client
    async fn stop(&self) -> Result<(), String>;

    /// # Errors
    /// Returns a message that is sent back to the requesting client
    async fn close_connections(&self) -> Result<(), String>;
}

/// Supplies snapshots for `status` subscribers
pub trait StatusProvider: Send + Sync {
    fn status(&self) -> StatusMessage;
}

/// Destination for user-visible log lines
pub trait MessageSink: Send + Sync {
    fn write_message(&self, message: &str);
}

struct Shared {
    logs: broadcast::Sender<String>,
    backlog: Mutex<VecDeque<String>>,
    raw_status: broadcast::Sender<StatusMessage>,
    handler: RwLock<Option<Arc<dyn ServerHandler>>>,
    provider: RwLock<Option<Arc<dyn StatusProvider>>>,
    status_interval: Duration,
    clients: AtomicUsize,
}

impl Shared {
    fn write_message(&self, message: &str) {
        let mut backlog = self.backlog.lock().unwrap_or_else(PoisonError::into_inner);
        if backlog.len() == LOG_BACKLOG_LIMIT {
            backlog.pop_front();
        }
        backlog.push_back(message.to_string());
        // no subscribers is fine
        let _ = self.logs.send(message.to_string());
    }

    /// Backlog snapshot plus a receiver for everything after it
    fn subscribe_logs(&self) -> (Vec<String>, broadcast::Receiver<String>) {
        let backlog = self.backlog.lock().unwrap_or_else(PoisonError::into_inner);
        let receiver = self.logs.subscribe();
        (backlog.iter().cloned().collect(), receiver)
    }

    fn handler(&self) -> Option<Arc<dyn ServerHandler>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn status(&self) -> StatusMessage {
        self.provider
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|provider| provider.status())
            .unwrap_or_default()
    }

    fn detach(&self) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = None;
        *self.provider.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Command channel server bound to a Unix socket
pub struct CommandServer {
    socket_path: PathBuf,
    shared: Arc<Shared>,
}

impl CommandServer {
    /// Create a server; nothing is bound until [`Self::start`]
    #[must_use]
    pub fn new(socket_path: impl AsRef<Path>, status_interval: Duration) -> Self {
        let (logs, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (raw_status, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            shared: Arc::new(Shared {
                logs,
                backlog: Mutex::new(VecDeque::with_capacity(LOG_BACKLOG_LIMIT)),
                raw_status,
                handler: RwLock::new(None),
                provider: RwLock::new(None),
                status_interval,
                clients: AtomicUsize::new(0),
            }),
        }
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Register the receiver of `reload`, `stop` and `close_connections`
    pub fn set_handler(&self, handler: Arc<dyn ServerHandler>) {
        *self
            .shared
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Register the source of `status` snapshots
    pub fn set_status_provider(&self, provider: Arc<dyn StatusProvider>) {
        *self
            .shared
            .provider
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(provider);
    }

    /// Handle for writing log lines without holding the server
    #[must_use]
    pub fn log_sink(&self) -> LogSink {
        LogSink {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Publish a log line to every `log` subscriber
    pub fn write_message(&self, message: &str) {
        self.shared.write_message(message);
    }

    /// Publish an engine-produced snapshot to `raw_status` subscribers
    pub fn push_status(&self, status: StatusMessage) {
        let _ = self.shared.raw_status.send(status);
    }

    /// Number of connections currently being served
    #[must_use]
    pub fn connected_clients(&self) -> usize {
        self.shared.clients.load(Ordering::SeqCst)
    }

    /// Bind the socket and serve connections until `cancel` fires
    ///
    /// A stale socket file at the path is replaced. The socket is only
    /// accessible to the owning user.
    ///
    /// # Errors
    /// Returns `Transport` if the socket cannot be bound
    pub async fn start(&self, cancel: CancellationToken) -> Result<JoinHandle<()>, ChannelError> {
        let _ = std::fs::remove_file(&self.socket_path);
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| {
            ChannelError::Transport(format!(
                "Failed to bind command socket {}: {e}",
                self.socket_path.display()
            ))
        })?;

        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.socket_path, perms)?;
        }

        tracing::info!(path = %self.socket_path.display(), "command server listening");

        let shared = Arc::clone(&self.shared);
        Ok(tokio::spawn(accept_loop(listener, shared, cancel)))
    }
}

impl MessageSink for CommandServer {
    fn write_message(&self, message: &str) {
        self.shared.write_message(message);
    }
}

impl Drop for CommandServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Cloneable log writer for a [`CommandServer`]
#[derive(Clone)]
pub struct LogSink {
    shared: Arc<Shared>,
}

impl MessageSink for LogSink {
    fn write_message(&self, message: &str) {
        self.shared.write_message(message);
    }
}

async fn accept_loop(listener: UnixListener, shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, _)) => {
                let shared = Arc::clone(&shared);
                let cancel = cancel.child_token();
                tokio::spawn(async move {
                    let session = Uuid::new_v4();
                    shared.clients.fetch_add(1, Ordering::SeqCst);
                    if let Err(e) = serve(stream, &shared, &cancel, session).await {
                        tracing::debug!(%session, error = %e, "command connection ended with error");
                    }
                    shared.clients.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Err(e) => tracing::warn!(error = %e, "command socket accept error"),
        }
    }

    // handlers may hold the server's log sink
    shared.detach();
    tracing::info!("command server stopped");
}

async fn serve(
    stream: UnixStream,
    shared: &Shared,
    cancel: &CancellationToken,
    session: Uuid,
) -> Result<(), ChannelError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let Some(request) = read_frame::<_, Request>(&mut reader).await? else {
        return Ok(());
    };
    tracing::debug!(%session, command = ?request.command, "command request");

    match request.command {
        Command::Reload | Command::Stop | Command::CloseConnections => {
            let frame = match run_admin(shared, request.command).await {
                Ok(()) => Frame::Ok,
                Err(message) => Frame::Error { message },
            };
            write_frame(&mut writer, &frame).await
        }
        Command::Status => {
            let interval = request
                .interval_ms
                .filter(|ms| *ms > 0)
                .map_or(shared.status_interval, Duration::from_millis);
            write_frame(&mut writer, &Frame::Accepted).await?;
            stream_status(shared, reader, writer, cancel, interval).await
        }
        Command::RawStatus => {
            let receiver = shared.raw_status.subscribe();
            write_frame(&mut writer, &Frame::Accepted).await?;
            stream_broadcast(reader, writer, cancel, receiver, Frame::Status).await
        }
        Command::Log => {
            let (backlog, receiver) = shared.subscribe_logs();
            write_frame(&mut writer, &Frame::Accepted).await?;
            for message in backlog {
                write_frame(&mut writer, &Frame::Log { message }).await?;
            }
            stream_broadcast(reader, writer, cancel, receiver, |message| Frame::Log {
                message,
            })
            .await
        }
    }
}

async fn run_admin(shared: &Shared, command: Command) -> Result<(), String> {
    let Some(handler) = shared.handler() else {
        return Err("no tunnel service is registered".to_string());
    };
    match command {
        Command::Reload => handler.reload().await,
        Command::Stop => handler.stop().await,
        Command::CloseConnections => handler.close_connections().await,
        Command::Status | Command::RawStatus | Command::Log => {
            Err(format!("{command:?} is not an administrative command"))
        }
    }
}

async fn stream_status(
    shared: &Shared,
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    cancel: &CancellationToken,
    interval: Duration,
) -> Result<(), ChannelError> {
    let mut ticker = tokio::time::interval(interval);
    let mut scratch = String::new();
    loop {
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            read = reader.read_line(&mut scratch) => {
                if peer_closed(read, &mut scratch) {
                    return Ok(());
                }
            }
            _ = ticker.tick() => {
                write_frame(&mut writer, &Frame::Status(shared.status())).await?;
            }
        }
    }
}

async fn stream_broadcast<T, F>(
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    cancel: &CancellationToken,
    mut receiver: broadcast::Receiver<T>,
    to_frame: F,
) -> Result<(), ChannelError>
where
    T: Clone,
    F: Fn(T) -> Frame,
{
    let mut scratch = String::new();
    loop {
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            read = reader.read_line(&mut scratch) => {
                if peer_closed(read, &mut scratch) {
                    return Ok(());
                }
            }
            received = receiver.recv() => match received {
                Ok(item) => write_frame(&mut writer, &to_frame(item)).await?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "subscriber lagged, dropping frames");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }
}

/// Subscribers send nothing after the request; EOF or an error means gone
fn peer_closed(read: std::io::Result<usize>, scratch: &mut String) -> bool {
    scratch.clear();
    !matches!(read, Ok(n) if n > 0)
}
