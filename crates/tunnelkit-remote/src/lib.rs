//! tunnelkit remote - profile creation, remote fetching and scheduled refresh
//!
//! [`HttpFetcher`] downloads a configuration document, [`ProfileManager`]
//! validates it and writes it through the profile store, and
//! [`RefreshScheduler`] walks every auto-updating profile. The periodic wake
//! itself comes from a [`WakeScheduler`], with [`TokioTrigger`] as the
//! in-process implementation used by the daemon.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

pub mod error;
pub mod fetch;
pub mod manager;
pub mod scheduler;
pub mod trigger;

pub use error::RemoteError;
pub use fetch::{user_agent, ContentFetcher, HttpFetcher};
pub use manager::{ProfileEdit, ProfileManager};
pub use scheduler::{compute_next_run, NextRun, RefreshReport, RefreshScheduler};
pub use trigger::{RefreshTask, TokioTrigger, TriggerError, WakeScheduler, UPDATE_TASK_ID};
