//! Contract with the tunnel engine

use std::sync::Arc;

use async_trait::async_trait;
use tunnelkit_command::{MessageSink, StatusMessage};
use tunnelkit_core::{ConfigChecker, Settings};

/// Routing flags handed to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelOptions {
    pub include_all_networks: bool,
    pub exclude_local_networks: bool,
    pub enforce_routes: bool,
    pub disable_memory_limit: bool,
}

impl From<&Settings> for TunnelOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            include_all_networks: settings.include_all_networks,
            exclude_local_networks: settings.exclude_local_networks,
            enforce_routes: settings.enforce_routes,
            disable_memory_limit: settings.disable_memory_limit,
        }
    }
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

/// Host facilities available to a running service
#[derive(Clone)]
pub struct ServiceContext {
    /// User-visible log stream
    pub log: Arc<dyn MessageSink>,
    pub options: TunnelOptions,
}

/// A tunnel engine: checks configurations and builds services from them
pub trait Engine: ConfigChecker {
    /// Build a service for `config` without starting it
    ///
    /// # Errors
    /// Returns the engine's message when the configuration is rejected
    fn new_service(
        &self,
        config: &str,
        context: ServiceContext,
    ) -> Result<Box<dyn TunnelService>, String>;
}

/// One engine instance built from one configuration
#[async_trait]
pub trait TunnelService: Send + Sync {
    /// # Errors
    /// Returns the engine's message if the service cannot come up
    async fn start(&self) -> Result<(), String>;

    /// # Errors
    /// Returns the engine's message; the service is considered gone either way
    async fn close(&self) -> Result<(), String>;

    /// Drop every live downstream connection
    ///
    /// # Errors
    /// Returns the engine's message
    async fn close_connections(&self) -> Result<(), String>;

    fn status(&self) -> StatusMessage;
}
