//! Tunnel lifecycle state machine
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//! Running -> Reasserting -> Stopping -> Stopped -> Starting -> Running | Failed
//! any start failure -> Failed(reason); only stop (or reload) leaves Failed
//! ```
//!
//! One async mutex guards the engine slot, so `start`, `stop` and `reload`
//! never interleave. A `reload` arriving during a `start` waits for it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tunnelkit_command::{MessageSink, ServerHandler, StatusMessage, StatusProvider};

use crate::engine::{Engine, ServiceContext, TunnelService};
use crate::error::ServiceError;
use crate::source::ConfigSource;

/// Observable lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelState {
    Stopped,
    Starting,
    Running,
    /// Restarting during a reload; briefly unavailable
    Reasserting,
    Stopping,
    Failed(String),
}

impl TunnelState {
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for TunnelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Reasserting => write!(f, "reasserting"),
            Self::Stopping => write!(f, "stopping"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

type ServiceSlot = Option<Arc<dyn TunnelService>>;

/// Owns the single engine instance of the tunnel process
pub struct TunnelController {
    engine: Arc<dyn Engine>,
    source: Arc<dyn ConfigSource>,
    log: Arc<dyn MessageSink>,
    slot: Mutex<ServiceSlot>,
    // readable without waiting on an in-flight operation
    active: RwLock<ServiceSlot>,
    state: watch::Sender<TunnelState>,
    reasserting: AtomicBool,
}

impl TunnelController {
    #[must_use]
    pub fn new(
        engine: Arc<dyn Engine>,
        source: Arc<dyn ConfigSource>,
        log: Arc<dyn MessageSink>,
    ) -> Self {
        let (state, _) = watch::channel(TunnelState::Stopped);
        Self {
            engine,
            source,
            log,
            slot: Mutex::new(None),
            active: RwLock::new(None),
            state,
            reasserting: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn state(&self) -> TunnelState {
        self.state.borrow().clone()
    }

    /// Receive every state change from now on
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TunnelState> {
        self.state.subscribe()
    }

    /// True while a reload is in progress
    #[must_use]
    pub fn reasserting(&self) -> bool {
        self.reasserting.load(Ordering::SeqCst)
    }

    /// Start the selected profile
    ///
    /// Any failure is written to the log stream and leaves the controller in
    /// `Failed` with no engine instance.
    ///
    /// # Errors
    /// Returns `InvalidState` if already running or failed, otherwise the
    /// cause of the failure
    pub async fn start(&self) -> Result<(), ServiceError> {
        let mut slot = self.slot.lock().await;
        self.start_locked(&mut slot).await
    }

    /// Close the engine instance, if any
    ///
    /// Engine errors are logged; ownership is released regardless.
    pub async fn stop(&self) {
        let mut slot = self.slot.lock().await;
        self.stop_locked(&mut slot).await;
    }

    /// Stop and start again, with `reasserting` raised throughout
    ///
    /// # Errors
    /// Returns the start failure; a stop failure is only logged
    pub async fn reload(&self) -> Result<(), ServiceError> {
        let mut slot = self.slot.lock().await;
        self.info("(tunnel) reloading service");
        let _reasserting = ReassertGuard::raise(&self.reasserting);
        if slot.is_some() {
            self.set_state(TunnelState::Reasserting);
        }
        self.stop_locked(&mut slot).await;
        self.start_locked(&mut slot).await
    }

    /// Ask the engine to drop its downstream connections
    ///
    /// # Errors
    /// Returns `InvalidState` when nothing is running, or the engine's error
    pub async fn close_connections(&self) -> Result<(), ServiceError> {
        let service = self
            .active()
            .ok_or_else(|| ServiceError::InvalidState("tunnel is not running".into()))?;
        service
            .close_connections()
            .await
            .map_err(ServiceError::Engine)
    }

    async fn start_locked(&self, slot: &mut ServiceSlot) -> Result<(), ServiceError> {
        if slot.is_some() {
            return Err(ServiceError::InvalidState("tunnel is already running".into()));
        }
        if let TunnelState::Failed(reason) = self.state() {
            return Err(ServiceError::InvalidState(format!(
                "tunnel failed ({reason}); stop it first"
            )));
        }

        self.set_state(TunnelState::Starting);
        match self.bring_up().await {
            Ok((name, service)) => {
                *slot = Some(Arc::clone(&service));
                self.set_active(Some(service));
                self.set_state(TunnelState::Running);
                self.info(&format!("(tunnel) started profile {name}"));
                Ok(())
            }
            Err(e) => {
                self.error(&format!("(tunnel) error: start service: {e}"));
                self.set_state(TunnelState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn bring_up(&self) -> Result<(String, Arc<dyn TunnelService>), ServiceError> {
        let selected = self.source.selected_config()?;
        self.engine
            .check_config(&selected.content)
            .map_err(ServiceError::Config)?;

        let context = ServiceContext {
            log: Arc::clone(&self.log),
            options: selected.options,
        };
        let service: Arc<dyn TunnelService> = self
            .engine
            .new_service(&selected.content, context)
            .map_err(ServiceError::Config)?
            .into();

        if let Err(message) = service.start().await {
            if let Err(close) = service.close().await {
                tracing::debug!(error = %close, "close after failed start");
            }
            return Err(ServiceError::Engine(message));
        }
        Ok((selected.profile.name, service))
    }

    async fn stop_locked(&self, slot: &mut ServiceSlot) {
        let Some(service) = slot.take() else {
            if matches!(self.state(), TunnelState::Failed(_)) {
                self.set_state(TunnelState::Stopped);
            }
            return;
        };

        self.set_active(None);
        self.set_state(TunnelState::Stopping);
        match service.close().await {
            Ok(()) => self.info("(tunnel) stopped"),
            Err(e) => self.error(&format!("(tunnel) error: close service: {e}")),
        }
        self.set_state(TunnelState::Stopped);
    }

    fn active(&self) -> ServiceSlot {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_active(&self, service: ServiceSlot) {
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = service;
    }

    fn set_state(&self, state: TunnelState) {
        tracing::debug!(%state, "tunnel state changed");
        self.state.send_replace(state);
    }

    fn info(&self, message: &str) {
        tracing::info!("{message}");
        self.log.write_message(message);
    }

    fn error(&self, message: &str) {
        tracing::warn!("{message}");
        self.log.write_message(message);
    }
}

/// Clears the reasserting flag when dropped
struct ReassertGuard<'a>(&'a AtomicBool);

impl<'a> ReassertGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ReassertGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServerHandler for TunnelController {
    async fn reload(&self) -> Result<(), String> {
        TunnelController::reload(self)
            .await
            .map_err(|e| e.to_string())
    }

    async fn stop(&self) -> Result<(), String> {
        TunnelController::stop(self).await;
        Ok(())
    }

    async fn close_connections(&self) -> Result<(), String> {
        TunnelController::close_connections(self)
            .await
            .map_err(|e| e.to_string())
    }
}

impl StatusProvider for TunnelController {
    fn status(&self) -> StatusMessage {
        self.active()
            .map(|service| service.status())
            .unwrap_or_default()
    }
}
