//! tunnelkit core - profile store, content access and settings
//!
//! This crate owns the durable state of the control plane: the `SQLite`
//! profile table with its migration ledger, the configuration documents
//! each profile points at, and the process-wide settings file.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

pub mod checker;
pub mod content;
pub mod error;
pub mod paths;
pub mod profile;
pub mod settings;
pub mod storage;

pub use checker::{ConfigChecker, JsonConfigChecker};
pub use content::ContentStore;
pub use error::{StoreError, StoreResult};
pub use paths::DataPaths;
pub use profile::{Profile, ProfileKind};
pub use settings::{Settings, SettingsError};
