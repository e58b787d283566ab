//! tunnelkit service - the tunnel process side of the control plane
//!
//! [`TunnelController`] owns the single engine instance and serialises
//! `start`, `stop` and `reload` against it. The engine is reached only
//! through the [`Engine`] and [`TunnelService`] traits; [`PassthroughEngine`]
//! is the built-in implementation used when no tunnel backend is linked.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

pub mod controller;
pub mod engine;
pub mod error;
pub mod installer;
pub mod passthrough;
pub mod source;

pub use controller::{TunnelController, TunnelState};
pub use engine::{Engine, ServiceContext, TunnelOptions, TunnelService};
pub use error::ServiceError;
pub use installer::{
    switch_tunnel, ConnectionStatus, ControllerInstaller, NetworkProfileHandle,
    NetworkProfileInstaller,
};
pub use passthrough::PassthroughEngine;
pub use source::{ConfigSource, SelectedConfig, StoreConfigSource};
