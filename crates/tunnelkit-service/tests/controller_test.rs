//! Lifecycle controller behaviour with a scripted engine

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tunnelkit_command::{MessageSink, ServerHandler, StatusMessage, StatusProvider};
use tunnelkit_core::{ConfigChecker, JsonConfigChecker, Profile};
use tunnelkit_service::{
    switch_tunnel, ConfigSource, ConnectionStatus, ControllerInstaller, Engine,
    NetworkProfileInstaller, SelectedConfig, ServiceContext, ServiceError, TunnelController,
    TunnelOptions, TunnelService, TunnelState,
};

/// Shared record of what the engine was asked to do
#[derive(Default)]
struct Journal {
    fail_start: AtomicBool,
    fail_close: AtomicBool,
    start_delay_ms: AtomicU64,
    closes: AtomicU32,
    events: Mutex<Vec<String>>,
    reasserting_during_start: Mutex<Vec<bool>>,
    controller: OnceLock<Weak<TunnelController>>,
}

impl Journal {
    fn record(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

struct ScriptedEngine(Arc<Journal>);

impl ConfigChecker for ScriptedEngine {
    fn check_config(&self, content: &str) -> Result<(), String> {
        JsonConfigChecker.check_config(content)
    }
}

impl Engine for ScriptedEngine {
    fn new_service(
        &self,
        _config: &str,
        _context: ServiceContext,
    ) -> Result<Box<dyn TunnelService>, String> {
        Ok(Box::new(ScriptedService(Arc::clone(&self.0))))
    }
}

struct ScriptedService(Arc<Journal>);

#[async_trait]
impl TunnelService for ScriptedService {
    async fn start(&self) -> Result<(), String> {
        self.0.record("start:begin");
        if let Some(controller) = self.0.controller.get().and_then(Weak::upgrade) {
            self.0
                .reasserting_during_start
                .lock()
                .unwrap()
                .push(controller.reasserting());
        }
        let delay = self.0.start_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.0.record("start:end");
        if self.0.fail_start.load(Ordering::SeqCst) {
            Err("bind failed".to_string())
        } else {
            Ok(())
        }
    }

    async fn close(&self) -> Result<(), String> {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
        self.0.record("close");
        if self.0.fail_close.load(Ordering::SeqCst) {
            Err("engine hung up".to_string())
        } else {
            Ok(())
        }
    }

    async fn close_connections(&self) -> Result<(), String> {
        self.0.record("close_connections");
        Ok(())
    }

    fn status(&self) -> StatusMessage {
        StatusMessage {
            memory: 1,
            workers: 2,
            connections: 3,
        }
    }
}

struct FixedSource {
    content: Mutex<Option<String>>,
}

impl ConfigSource for FixedSource {
    fn selected_config(&self) -> Result<SelectedConfig, ServiceError> {
        let content = self
            .content
            .lock()
            .unwrap()
            .clone()
            .ok_or(ServiceError::NoSelection)?;
        Ok(SelectedConfig {
            profile: Profile::local("A", "/tmp/a.json").with_id(1),
            content,
            options: TunnelOptions::default(),
        })
    }
}

#[derive(Default)]
struct Lines(Mutex<Vec<String>>);

impl MessageSink for Lines {
    fn write_message(&self, message: &str) {
        self.0.lock().unwrap().push(message.to_string());
    }
}

impl Lines {
    fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct Harness {
    controller: Arc<TunnelController>,
    journal: Arc<Journal>,
    source: Arc<FixedSource>,
    lines: Arc<Lines>,
}

fn harness() -> Harness {
    let journal = Arc::new(Journal::default());
    let source = Arc::new(FixedSource {
        content: Mutex::new(Some("{}".to_string())),
    });
    let lines = Arc::new(Lines::default());
    let controller = Arc::new(TunnelController::new(
        Arc::new(ScriptedEngine(Arc::clone(&journal))),
        source.clone(),
        lines.clone(),
    ));
    journal
        .controller
        .set(Arc::downgrade(&controller))
        .unwrap_or_else(|_| panic!("controller already set"));
    Harness {
        controller,
        journal,
        source,
        lines,
    }
}

#[tokio::test]
async fn test_start_runs_selected_profile() {
    let h = harness();
    h.controller.start().await.expect("start should succeed");

    assert_eq!(h.controller.state(), TunnelState::Running);
    assert_eq!(h.lines.all(), vec!["(tunnel) started profile A"]);
    assert_eq!(
        h.controller.status(),
        StatusMessage {
            memory: 1,
            workers: 2,
            connections: 3
        }
    );
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let h = harness();
    h.controller.start().await.unwrap();
    let err = h.controller.start().await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
    assert_eq!(h.controller.state(), TunnelState::Running);
}

#[tokio::test]
async fn test_engine_start_failure_leaves_nothing_running() {
    let h = harness();
    h.journal.fail_start.store(true, Ordering::SeqCst);

    let err = h.controller.start().await.unwrap_err();
    assert!(matches!(err, ServiceError::Engine(ref m) if m == "bind failed"));
    assert_eq!(
        h.controller.state(),
        TunnelState::Failed("Engine error: bind failed".into())
    );
    // the half-started instance was closed
    assert_eq!(h.journal.closes.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.lines.all(),
        vec!["(tunnel) error: start service: Engine error: bind failed"]
    );
    assert_eq!(h.controller.status(), StatusMessage::default());
}

#[tokio::test]
async fn test_rejected_config_message_is_verbatim() {
    let h = harness();
    *h.source.content.lock().unwrap() = Some("[]".to_string());

    let err = h.controller.start().await.unwrap_err();
    assert!(matches!(err, ServiceError::Config(_)));
    assert_eq!(err.to_string(), "configuration must be a JSON object");
    assert!(h.journal.events().is_empty());
}

#[tokio::test]
async fn test_failed_accepts_only_stop() {
    let h = harness();
    *h.source.content.lock().unwrap() = None;

    let err = h.controller.start().await.unwrap_err();
    assert!(matches!(err, ServiceError::NoSelection));
    assert!(matches!(h.controller.state(), TunnelState::Failed(_)));

    *h.source.content.lock().unwrap() = Some("{}".to_string());
    let err = h.controller.start().await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    h.controller.stop().await;
    assert_eq!(h.controller.state(), TunnelState::Stopped);
    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state(), TunnelState::Running);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = harness();
    h.controller.stop().await;
    assert_eq!(h.controller.state(), TunnelState::Stopped);

    h.controller.start().await.unwrap();
    h.controller.stop().await;
    h.controller.stop().await;

    assert_eq!(h.journal.closes.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.state(), TunnelState::Stopped);
}

#[tokio::test]
async fn test_stop_error_is_logged_and_ownership_released() {
    let h = harness();
    h.controller.start().await.unwrap();
    h.journal.fail_close.store(true, Ordering::SeqCst);

    h.controller.stop().await;

    assert_eq!(h.controller.state(), TunnelState::Stopped);
    assert!(h
        .lines
        .all()
        .contains(&"(tunnel) error: close service: engine hung up".to_string()));
    // a fresh start is possible
    h.journal.fail_close.store(false, Ordering::SeqCst);
    h.controller.start().await.unwrap();
}

#[tokio::test]
async fn test_reload_passes_through_reasserting() {
    let h = harness();
    h.controller.start().await.unwrap();
    let mut states = h.controller.subscribe();

    h.controller.reload().await.unwrap();

    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), TunnelState::Running);
    assert!(!h.controller.reasserting());
    assert_eq!(
        *h.journal.reasserting_during_start.lock().unwrap(),
        vec![false, true]
    );
    assert_eq!(
        h.journal.events(),
        vec!["start:begin", "start:end", "close", "start:begin", "start:end"]
    );
}

#[tokio::test]
async fn test_reload_clears_flag_when_stop_fails() {
    let h = harness();
    h.controller.start().await.unwrap();
    h.journal.fail_close.store(true, Ordering::SeqCst);

    h.controller
        .reload()
        .await
        .expect("start still runs after a failed stop");

    assert!(!h.controller.reasserting());
    assert_eq!(h.controller.state(), TunnelState::Running);
}

#[tokio::test]
async fn test_reload_clears_flag_when_start_fails() {
    let h = harness();
    h.controller.start().await.unwrap();
    h.journal.fail_start.store(true, Ordering::SeqCst);

    assert!(h.controller.reload().await.is_err());

    assert!(!h.controller.reasserting());
    assert!(matches!(h.controller.state(), TunnelState::Failed(_)));
    assert_eq!(
        *h.journal.reasserting_during_start.lock().unwrap(),
        vec![false, true]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reload_waits_for_inflight_start() {
    let h = harness();
    h.journal.start_delay_ms.store(50, Ordering::SeqCst);

    let starting = {
        let controller = Arc::clone(&h.controller);
        tokio::spawn(async move { controller.start().await })
    };
    tokio::task::yield_now().await;
    let reloading = {
        let controller = Arc::clone(&h.controller);
        tokio::spawn(async move { controller.reload().await })
    };

    starting.await.unwrap().unwrap();
    reloading.await.unwrap().unwrap();

    assert_eq!(
        h.journal.events(),
        vec!["start:begin", "start:end", "close", "start:begin", "start:end"]
    );
    assert_eq!(h.controller.state(), TunnelState::Running);
}

#[tokio::test]
async fn test_close_connections_requires_running_tunnel() {
    let h = harness();
    let err = h.controller.close_connections().await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    h.controller.start().await.unwrap();
    h.controller.close_connections().await.unwrap();
    assert!(h
        .journal
        .events()
        .contains(&"close_connections".to_string()));
}

#[tokio::test]
async fn test_stop_command_stops_tunnel_only() {
    let h = harness();
    h.controller.start().await.unwrap();

    ServerHandler::stop(h.controller.as_ref()).await.unwrap();
    assert_eq!(h.controller.state(), TunnelState::Stopped);
    assert_eq!(
        h.lines.all(),
        vec!["(tunnel) started profile A", "(tunnel) stopped"]
    );

    // the process keeps serving; a later reload brings the tunnel back
    ServerHandler::reload(h.controller.as_ref()).await.unwrap();
    assert_eq!(h.controller.state(), TunnelState::Running);
}

#[tokio::test]
async fn test_reload_logs_each_phase() {
    let h = harness();
    h.controller.start().await.unwrap();

    h.controller.reload().await.unwrap();

    assert_eq!(
        h.lines.all(),
        vec![
            "(tunnel) started profile A",
            "(tunnel) reloading service",
            "(tunnel) stopped",
            "(tunnel) started profile A",
        ]
    );
}

#[tokio::test]
async fn test_reload_command_reports_start_error() {
    let h = harness();
    *h.source.content.lock().unwrap() = None;

    let message = ServerHandler::reload(h.controller.as_ref())
        .await
        .unwrap_err();
    assert_eq!(message, "No profile selected");
}

#[tokio::test]
async fn test_switch_through_installed_profile() {
    let h = harness();
    let installer = ControllerInstaller::new(Arc::clone(&h.controller));
    assert!(installer.load().await.unwrap().is_none());

    let handle = installer.install().await.unwrap();
    assert!(installer.load().await.unwrap().is_some());
    assert_eq!(handle.status(), ConnectionStatus::Disconnected);
    let mut statuses = handle.subscribe();

    switch_tunnel(handle.as_ref(), true).await.unwrap();
    assert_eq!(handle.status(), ConnectionStatus::Connected);
    tokio::time::timeout(
        Duration::from_secs(5),
        statuses.wait_for(|status| *status == ConnectionStatus::Connected),
    )
    .await
    .expect("status change should be forwarded")
    .unwrap();

    switch_tunnel(handle.as_ref(), false).await.unwrap();
    assert_eq!(handle.status(), ConnectionStatus::Disconnected);
}
