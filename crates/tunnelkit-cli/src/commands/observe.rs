//! Observer commands
//!
//! Handles: tunnelkit status, tunnelkit logs

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tunnelkit_command::{
    ChannelError, ClientHandler, Command, CommandClient, LogHistory, StatusMessage,
};

const MIB: u64 = 1024 * 1024;

/// Records how a session ended and wakes the waiting command
#[derive(Default)]
struct Ending {
    reason: Mutex<Option<Option<String>>>,
    notify: Notify,
}

impl Ending {
    fn finish(&self, reason: Option<String>) {
        *self.reason.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
        self.notify.notify_one();
    }

    fn take(&self) -> Option<Option<String>> {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

struct StatusPrinter {
    ending: Ending,
}

impl ClientHandler for StatusPrinter {
    fn connected(&self) {
        tracing::debug!("status stream connected");
    }

    fn disconnected(&self, reason: Option<String>) {
        self.ending.finish(reason);
    }

    fn status(&self, status: StatusMessage) {
        println!(
            "memory: {} MiB  workers: {}  connections: {}",
            status.memory / MIB,
            status.workers,
            status.connections
        );
    }
}

struct LogPrinter {
    history: Mutex<LogHistory>,
    ending: Ending,
}

impl ClientHandler for LogPrinter {
    fn connected(&self) {
        tracing::debug!("log stream connected");
        // the server replays its buffer on every new session
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn disconnected(&self, reason: Option<String>) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.closed(reason.as_deref());
        if let Some(marker) = history.lines().next() {
            println!("{marker}");
        }
        drop(history);
        self.ending.finish(reason);
    }

    fn log_line(&self, line: String) {
        println!("{line}");
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }
}

/// Print status snapshots until interrupted or the daemon goes away
pub async fn status(interval_ms: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let printer = Arc::new(StatusPrinter {
        ending: Ending::default(),
    });
    let path = super::socket_path()?;
    let mut client = CommandClient::new(&path, Command::Status, printer.clone())?;
    if let Some(ms) = interval_ms {
        client = client.with_interval(Duration::from_millis(ms));
    }
    follow(&client, &path, &printer.ending).await
}

/// Print the daemon's recent log lines, then follow new ones
pub async fn logs() -> Result<(), Box<dyn std::error::Error>> {
    let printer = Arc::new(LogPrinter {
        history: Mutex::new(LogHistory::new()),
        ending: Ending::default(),
    });
    let path = super::socket_path()?;
    let client = CommandClient::new(&path, Command::Log, printer.clone())?;
    follow(&client, &path, &printer.ending).await
}

async fn follow(
    client: &CommandClient,
    path: &Path,
    ending: &Ending,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let interrupted = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted.cancel();
        }
    });

    match client.connect(&cancel).await {
        Ok(()) => {}
        Err(ChannelError::Cancelled) => return Ok(()),
        Err(e) => {
            ctrl_c.abort();
            return Err(connect_error(path, &e).into());
        }
    }

    tokio::select! {
        () = cancel.cancelled() => {}
        () = ending.notify.notified() => {}
    }
    ctrl_c.abort();
    client.disconnect().await;

    match ending.take() {
        Some(Some(reason)) => Err(reason.into()),
        _ => Ok(()),
    }
}

fn connect_error(path: &Path, error: &ChannelError) -> String {
    format!(
        "Failed to connect to command socket at {}: {error}. Is the daemon running?",
        path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printer() -> LogPrinter {
        LogPrinter {
            history: Mutex::new(LogHistory::new()),
            ending: Ending::default(),
        }
    }

    #[test]
    fn test_reconnect_starts_with_empty_history() {
        let printer = printer();
        printer.connected();
        printer.log_line("first session".to_string());
        printer.disconnected(None);

        printer.connected();
        printer.log_line("second session".to_string());

        let history = printer.history.lock().expect("Failed to lock history");
        let lines: Vec<_> = history.lines().collect();
        assert_eq!(lines, vec!["second session"]);
    }

    #[test]
    fn test_disconnect_records_reason() {
        let printer = printer();
        printer.connected();
        printer.disconnected(Some("connection closed by server".to_string()));

        assert_eq!(
            printer.ending.take(),
            Some(Some("connection closed by server".to_string()))
        );
        let history = printer.history.lock().expect("Failed to lock history");
        assert_eq!(
            history.lines().next(),
            Some("(log client closed) connection closed by server")
        );
    }
}
