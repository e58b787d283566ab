//! Refresh of auto-updating remote profiles

use chrono::{DateTime, Duration, Utc};
use tunnelkit_core::{Profile, ProfileKind};

use crate::error::RemoteError;
use crate::manager::ProfileManager;

/// When the next refresh should happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextRun {
    /// No profile is eligible for refresh
    NotNeeded,
    /// At least one profile is overdue
    Immediate,
    /// Nothing is due before this instant
    At(DateTime<Utc>),
}

/// Earliest time any of `profiles` is due, given the refresh interval
///
/// A profile that was never updated counts as overdue.
#[must_use]
pub fn compute_next_run(profiles: &[Profile], interval: Duration, now: DateTime<Utc>) -> NextRun {
    let mut oldest: Option<DateTime<Utc>> = None;
    for profile in profiles.iter().filter(|p| p.is_auto_updating()) {
        match profile.last_updated {
            None => return NextRun::Immediate,
            Some(at) => oldest = Some(oldest.map_or(at, |current| current.min(at))),
        }
    }

    match oldest {
        Some(oldest) if oldest > now - interval => NextRun::At(oldest + interval),
        Some(_) => NextRun::Immediate,
        None => NextRun::NotNeeded,
    }
}

/// Outcome of one refresh pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Profiles whose content and `last_updated` were replaced
    pub updated: Vec<i64>,
    /// Profiles that failed, with the error message
    pub failed: Vec<(i64, String)>,
}

impl RefreshReport {
    /// True when no profile failed
    #[must_use]
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Brings auto-updating remote profiles up to date
#[derive(Clone)]
pub struct RefreshScheduler {
    manager: ProfileManager,
    interval: Duration,
}

impl RefreshScheduler {
    #[must_use]
    pub fn new(manager: ProfileManager, interval: Duration) -> Self {
        Self { manager, interval }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Refresh every eligible profile in `order`, isolating failures
    ///
    /// # Errors
    /// Returns an error only if the eligible profiles cannot be listed
    pub async fn run(&self) -> Result<RefreshReport, RemoteError> {
        let profiles = self.eligible()?;
        let mut report = RefreshReport::default();

        for profile in profiles {
            let id = profile.id.unwrap_or_default();
            match self.manager.update_remote_profile(&profile).await {
                Ok(_) => report.updated.push(id),
                Err(e) => {
                    tracing::warn!(profile_id = id, error = %e, "failed to refresh profile");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        tracing::info!(
            updated = report.updated.len(),
            failed = report.failed.len(),
            "refresh pass finished"
        );
        Ok(report)
    }

    /// Run one pass, returning whether every profile succeeded
    pub async fn run_once(&self) -> bool {
        match self.run().await {
            Ok(report) => report.success(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to list profiles for refresh");
                false
            }
        }
    }

    /// Next refresh time computed from the stored profiles
    ///
    /// # Errors
    /// Returns an error if the eligible profiles cannot be listed
    pub fn next_run(&self, now: DateTime<Utc>) -> Result<NextRun, RemoteError> {
        let profiles = self.eligible()?;
        Ok(compute_next_run(&profiles, self.interval, now))
    }

    fn eligible(&self) -> Result<Vec<Profile>, RemoteError> {
        let profiles = self
            .manager
            .database()
            .with_store(|store| store.list_auto_update_enabled())?;
        Ok(profiles
            .into_iter()
            .filter(|p| p.kind == ProfileKind::Remote)
            .collect())
    }
}
