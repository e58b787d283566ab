//! System network profile that fronts the tunnel
//!
//! Observers do not talk to the [`TunnelController`] directly; they go
//! through a handle with a coarse [`ConnectionStatus`], as a platform VPN
//! configuration would expose it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::controller::{TunnelController, TunnelState};
use crate::error::ServiceError;

/// Coarse connection status seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Invalid,
    Disconnected,
    Connecting,
    Connected,
    Reasserting,
    Disconnecting,
}

impl ConnectionStatus {
    /// Whether the on/off control should accept input
    #[must_use]
    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Connected | Self::Disconnected | Self::Reasserting)
    }

    /// Whether the status is settled enough to toggle
    #[must_use]
    pub fn is_switchable(self) -> bool {
        matches!(self, Self::Connected | Self::Disconnected)
    }

    /// Whether the tunnel is up or on its way up or down
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Disconnecting | Self::Reasserting
        )
    }
}

impl From<&TunnelState> for ConnectionStatus {
    fn from(state: &TunnelState) -> Self {
        match state {
            TunnelState::Stopped | TunnelState::Failed(_) => Self::Disconnected,
            TunnelState::Starting => Self::Connecting,
            TunnelState::Running => Self::Connected,
            TunnelState::Reasserting => Self::Reasserting,
            TunnelState::Stopping => Self::Disconnecting,
        }
    }
}

/// Installed network profile
#[async_trait]
pub trait NetworkProfileHandle: Send + Sync {
    fn status(&self) -> ConnectionStatus;

    /// Status changes, delivered as they happen
    fn subscribe(&self) -> watch::Receiver<ConnectionStatus>;

    /// # Errors
    /// Returns the reason the tunnel could not be started
    async fn start(&self) -> Result<(), ServiceError>;

    async fn stop(&self);
}

/// Creates or finds the network profile
#[async_trait]
pub trait NetworkProfileInstaller: Send + Sync {
    /// # Errors
    /// Returns an error if the profile cannot be created
    async fn install(&self) -> Result<Arc<dyn NetworkProfileHandle>, ServiceError>;

    /// # Errors
    /// Returns an error if existing profiles cannot be read
    async fn load(&self) -> Result<Option<Arc<dyn NetworkProfileHandle>>, ServiceError>;
}

/// Start the tunnel when enabling, stop it otherwise
///
/// # Errors
/// Returns the start failure
pub async fn switch_tunnel(
    handle: &dyn NetworkProfileHandle,
    enabled: bool,
) -> Result<(), ServiceError> {
    if enabled {
        handle.start().await
    } else {
        handle.stop().await;
        Ok(())
    }
}

/// In-process installer backed by a [`TunnelController`]
pub struct ControllerInstaller {
    controller: Arc<TunnelController>,
    installed: std::sync::Mutex<Option<Arc<ControllerHandle>>>,
}

impl ControllerInstaller {
    #[must_use]
    pub fn new(controller: Arc<TunnelController>) -> Self {
        Self {
            controller,
            installed: std::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl NetworkProfileInstaller for ControllerInstaller {
    async fn install(&self) -> Result<Arc<dyn NetworkProfileHandle>, ServiceError> {
        let mut installed = self
            .installed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let handle = installed
            .get_or_insert_with(|| Arc::new(ControllerHandle::new(Arc::clone(&self.controller))));
        Ok(Arc::clone(handle) as Arc<dyn NetworkProfileHandle>)
    }

    async fn load(&self) -> Result<Option<Arc<dyn NetworkProfileHandle>>, ServiceError> {
        let installed = self
            .installed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(installed
            .as_ref()
            .map(|handle| Arc::clone(handle) as Arc<dyn NetworkProfileHandle>))
    }
}

struct ControllerHandle {
    controller: Arc<TunnelController>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ControllerHandle {
    fn new(controller: Arc<TunnelController>) -> Self {
        let mut states = controller.subscribe();
        let initial = ConnectionStatus::from(&*states.borrow());
        let (tx, status) = watch::channel(initial);

        // forwarder ends when the controller or every receiver is gone
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let next = ConnectionStatus::from(&*states.borrow_and_update());
                if tx.send(next).is_err() {
                    break;
                }
            }
        });

        Self { controller, status }
    }
}

#[async_trait]
impl NetworkProfileHandle for ControllerHandle {
    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from(&self.controller.state())
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.controller.start().await
    }

    async fn stop(&self) {
        self.controller.stop().await;
    }
}
