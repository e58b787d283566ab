//! Subscribing command channel client
//!
//! The server may not be up yet, or may be restarting, so [`CommandClient::connect`]
//! retries a bounded number of times. Once connected, events are delivered
//! to a [`ClientHandler`] from a reader task: `connected` first, then stream
//! events, then exactly one `disconnected`. There is no automatic reconnect.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ChannelError;
use crate::protocol::{read_frame, write_frame, Command, Frame, Request, StatusMessage};

/// Connection attempts before giving up
pub const CONNECT_ATTEMPTS: u32 = 10;

/// Pause before each connection attempt
pub const RETRY_DELAY: Duration = Duration::from_millis(100);

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Reason reported when the server ends the stream
pub const CLOSED_BY_SERVER: &str = "connection closed by server";

/// Receives session events
pub trait ClientHandler: Send + Sync {
    fn connected(&self);

    /// `reason` is `None` for a requested disconnect
    fn disconnected(&self, reason: Option<String>);

    fn status(&self, status: StatusMessage) {
        let _ = status;
    }

    fn log_line(&self, line: String) {
        let _ = line;
    }
}

/// Both halves of an accepted connection
///
/// The write half stays open for the whole session: dropping it shuts down
/// the write direction, which the server reads as the client leaving.
struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

struct Session {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// One logical subscription to a [`crate::CommandServer`]
pub struct CommandClient {
    socket_path: PathBuf,
    request: Request,
    handler: Arc<dyn ClientHandler>,
    attempts: u32,
    retry_delay: Duration,
    session: Mutex<Option<Session>>,
    // held for a whole connect so concurrent callers share one session
    connecting: tokio::sync::Mutex<()>,
}

impl CommandClient {
    /// Client for a subscription command
    ///
    /// # Errors
    /// Returns `Protocol` for an administrative command; use
    /// [`crate::StandaloneClient`] for those
    pub fn new(
        socket_path: impl AsRef<Path>,
        command: Command,
        handler: Arc<dyn ClientHandler>,
    ) -> Result<Self, ChannelError> {
        if !command.is_subscription() {
            return Err(ChannelError::Protocol(format!(
                "{command:?} is not a subscription"
            )));
        }
        Ok(Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            request: Request::new(command),
            handler,
            attempts: CONNECT_ATTEMPTS,
            retry_delay: RETRY_DELAY,
            session: Mutex::new(None),
            connecting: tokio::sync::Mutex::new(()),
        })
    }

    /// Ask for status snapshots at this cadence instead of the server's
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.request.interval_ms = u64::try_from(interval.as_millis()).ok();
        self
    }

    /// Whether a session is open and its reader still running
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|session| !session.task.is_finished())
    }

    /// Open the session, retrying while the server is unavailable
    ///
    /// Each attempt waits [`RETRY_DELAY`] and then opens a fresh connection.
    /// `cancel` is honoured during the wait and again before each attempt.
    /// Calling this while connected, or while another call is connecting,
    /// leaves a single session open.
    ///
    /// # Errors
    /// Returns `Cancelled` if `cancel` fired, or `Exhausted` once every
    /// attempt failed
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<(), ChannelError> {
        let _connecting = tokio::select! {
            () = cancel.cancelled() => return Err(ChannelError::Cancelled),
            guard = self.connecting.lock() => guard,
        };
        if self.is_connected() {
            return Ok(());
        }

        let path = self.socket_path.clone();
        let request = self.request.clone();
        let connection = retry(self.attempts, self.retry_delay, cancel, |attempt| {
            tracing::debug!(attempt, path = %path.display(), "connecting to command server");
            handshake(&path, &request)
        })
        .await?;

        self.handler.connected();

        let stop = CancellationToken::new();
        let task = tokio::spawn(read_events(
            connection,
            Arc::clone(&self.handler),
            stop.clone(),
        ));
        *self.lock() = Some(Session { stop, task });
        Ok(())
    }

    /// End the session; safe to call repeatedly or before any connect
    pub async fn disconnect(&self) {
        let session = self.lock().take();
        if let Some(session) = session {
            session.stop.cancel();
            if let Err(e) = session.task.await {
                tracing::warn!(error = %e, "command client reader task failed");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CommandClient {
    fn drop(&mut self) {
        if let Some(session) = self.lock().take() {
            session.stop.cancel();
        }
    }
}

/// Run `op` up to `attempts` times, sleeping `delay` before each try
///
/// Attempt-level failures are swallowed; only the last one is reported.
pub(crate) async fn retry<T, F, Fut>(
    attempts: u32,
    delay: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, ChannelError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ChannelError>>,
{
    let mut last = None;
    for attempt in 1..=attempts {
        tokio::select! {
            () = cancel.cancelled() => return Err(ChannelError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
        if cancel.is_cancelled() {
            return Err(ChannelError::Cancelled);
        }

        match op(attempt).await {
            Ok(value) if cancel.is_cancelled() => {
                drop(value);
                return Err(ChannelError::Cancelled);
            }
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::debug!(attempt, error = %e, "connection attempt failed");
                last = Some(e);
            }
        }
    }

    Err(ChannelError::Exhausted {
        attempts,
        last: last.map(|e| e.to_string()).unwrap_or_default(),
    })
}

/// Connect, send the request and wait for the `accepted` frame
async fn handshake(path: &Path, request: &Request) -> Result<Connection, ChannelError> {
    let stream = UnixStream::connect(path).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    write_frame(&mut writer, request).await?;

    let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame::<_, Frame>(&mut reader))
        .await
        .map_err(|_| ChannelError::Transport("timed out waiting for handshake".into()))??;

    match reply {
        Some(Frame::Accepted) => Ok(Connection { reader, writer }),
        Some(Frame::Error { message }) => Err(ChannelError::Rejected(message)),
        Some(other) => Err(ChannelError::Protocol(format!(
            "unexpected handshake frame: {other:?}"
        ))),
        None => Err(ChannelError::Transport(CLOSED_BY_SERVER.into())),
    }
}

async fn read_events(
    connection: Connection,
    handler: Arc<dyn ClientHandler>,
    stop: CancellationToken,
) {
    let Connection {
        mut reader,
        writer,
    } = connection;
    let reason = loop {
        let frame = tokio::select! {
            () = stop.cancelled() => break None,
            frame = read_frame::<_, Frame>(&mut reader) => frame,
        };
        match frame {
            Ok(Some(Frame::Status(status))) => handler.status(status),
            Ok(Some(Frame::Log { message })) => handler.log_line(message),
            Ok(Some(Frame::Error { message })) => break Some(message),
            Ok(Some(other)) => tracing::debug!(frame = ?other, "ignoring unexpected frame"),
            Ok(None) => break Some(CLOSED_BY_SERVER.to_string()),
            Err(e) => break Some(e.to_string()),
        }
    };
    drop(writer);
    handler.disconnected(reason);
}
