//! Wake scheduling of the refresh task

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::Fixture;
use tokio_util::sync::CancellationToken;
use tunnelkit_remote::{
    ContentFetcher, RefreshScheduler, RefreshTask, RemoteError, TokioTrigger, TriggerError,
    WakeScheduler, UPDATE_TASK_ID,
};

#[derive(Default)]
struct RecordingWake {
    submissions: Mutex<Vec<Option<DateTime<Utc>>>>,
    registered: Mutex<Vec<String>>,
    pending: bool,
    refuse: bool,
}

impl WakeScheduler for RecordingWake {
    fn register(&self, task_id: &str) {
        self.registered.lock().unwrap().push(task_id.to_string());
    }

    fn has_pending(&self, _task_id: &str) -> bool {
        self.pending
    }

    fn submit(&self, _task_id: &str, earliest: Option<DateTime<Utc>>) -> Result<(), TriggerError> {
        if self.refuse {
            return Err(TriggerError::Refused("quota exceeded".into()));
        }
        self.submissions.lock().unwrap().push(earliest);
        Ok(())
    }
}

/// Fetcher that counts calls, cancels a token on the n-th, and can hang
struct ScriptedFetcher {
    calls: AtomicUsize,
    cancel_on: usize,
    cancel: CancellationToken,
    hang: bool,
}

#[async_trait]
impl ContentFetcher for ScriptedFetcher {
    async fn fetch(&self, _url: &str) -> Result<String, RemoteError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= self.cancel_on {
            self.cancel.cancel();
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok("{}".to_string())
    }
}

fn scheduler(fixture: &Fixture) -> RefreshScheduler {
    RefreshScheduler::new(fixture.manager.clone(), Duration::minutes(15))
}

#[tokio::test]
async fn test_setup_without_profiles_submits_nothing() {
    let fixture = Fixture::new();
    let wake = Arc::new(RecordingWake::default());
    let task = RefreshTask::new(scheduler(&fixture), wake.clone());

    task.setup();

    assert_eq!(*wake.registered.lock().unwrap(), vec![UPDATE_TASK_ID]);
    assert!(wake.submissions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_setup_schedules_from_oldest_update() {
    let fixture = Fixture::new();
    let updated = Utc::now() - Duration::minutes(5);
    fixture.seed_remote("r", "https://example.com/r.json", "{}", Some(updated));

    let wake = Arc::new(RecordingWake::default());
    RefreshTask::new(scheduler(&fixture), wake.clone()).setup();

    assert_eq!(
        *wake.submissions.lock().unwrap(),
        vec![Some(updated + Duration::minutes(15))]
    );
}

#[tokio::test]
async fn test_setup_keeps_existing_request() {
    let fixture = Fixture::new();
    fixture.seed_remote("r", "https://example.com/r.json", "{}", None);

    let wake = Arc::new(RecordingWake {
        pending: true,
        ..RecordingWake::default()
    });
    RefreshTask::new(scheduler(&fixture), wake.clone()).setup();

    assert!(wake.submissions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_invoke_rearms_one_interval_later_even_on_failure() {
    let fixture = Fixture::new();
    fixture.seed_remote("r", "http://127.0.0.1:9/unreachable.json", "{}", None);

    let wake = Arc::new(RecordingWake::default());
    let task = RefreshTask::new(scheduler(&fixture), wake.clone());
    let before = Utc::now();

    assert!(!task.on_invoke().await);

    let submissions = wake.submissions.lock().unwrap();
    assert_eq!(submissions.len(), 1);
    let next = submissions[0].expect("a completed pass schedules a time");
    assert!(next >= before + Duration::minutes(15));
}

#[tokio::test]
async fn test_expire_rearms_immediately_and_refusal_is_swallowed() {
    let fixture = Fixture::new();
    let wake = Arc::new(RecordingWake::default());
    RefreshTask::new(scheduler(&fixture), wake.clone()).on_expire();
    assert_eq!(*wake.submissions.lock().unwrap(), vec![None]);

    let refusing = Arc::new(RecordingWake {
        refuse: true,
        ..RecordingWake::default()
    });
    let task = RefreshTask::new(scheduler(&fixture), refusing.clone());
    task.on_expire();
    assert!(task.on_invoke().await);
    assert!(refusing.submissions.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_tokio_trigger_invokes_and_rearms() {
    let cancel = CancellationToken::new();
    let fetcher = Arc::new(ScriptedFetcher {
        calls: AtomicUsize::new(0),
        cancel_on: 1,
        cancel: cancel.clone(),
        hang: false,
    });
    let fixture = Fixture::with_fetcher(fetcher.clone());
    fixture.seed_remote("r", "https://example.com/r.json", "{}", None);

    let trigger = Arc::new(TokioTrigger::new(StdDuration::from_secs(60)));
    let task = RefreshTask::new(scheduler(&fixture), trigger.clone());
    task.setup();
    assert_eq!(trigger.pending(UPDATE_TASK_ID), Some(None));

    trigger.run(&task, cancel).await;

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    let next = trigger
        .pending(UPDATE_TASK_ID)
        .flatten()
        .expect("the pass re-arms with a time");
    assert!(next > Utc::now() + Duration::minutes(14));
}

#[tokio::test(start_paused = true)]
async fn test_tokio_trigger_expires_hung_invocation() {
    let cancel = CancellationToken::new();
    let fetcher = Arc::new(ScriptedFetcher {
        calls: AtomicUsize::new(0),
        cancel_on: 2,
        cancel: cancel.clone(),
        hang: true,
    });
    let fixture = Fixture::with_fetcher(fetcher.clone());
    fixture.seed_remote("r", "https://example.com/r.json", "{}", None);

    let trigger = Arc::new(TokioTrigger::new(StdDuration::from_secs(1)));
    let task = RefreshTask::new(scheduler(&fixture), trigger.clone());
    task.setup();

    trigger.run(&task, cancel).await;

    // expired once and re-armed immediately; the second run was cancelled
    // while hung, so it neither expired nor re-armed
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    assert_eq!(trigger.pending(UPDATE_TASK_ID), None);
}

#[test]
fn test_submit_requires_registration() {
    let trigger = TokioTrigger::default();
    assert!(matches!(
        trigger.submit(UPDATE_TASK_ID, None),
        Err(TriggerError::NotRegistered(_))
    ));
    trigger.register(UPDATE_TASK_ID);
    trigger.submit(UPDATE_TASK_ID, None).unwrap();
    assert!(trigger.has_pending(UPDATE_TASK_ID));
}
