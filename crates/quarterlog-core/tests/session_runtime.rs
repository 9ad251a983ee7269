//! Runtime tests: a real tokio runtime with a manual clock, an in-memory store
//! and a fast tick cadence.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::broadcast;

use quarterlog_core::timer::snapshot::{load_snapshot, Phase};
use quarterlog_core::{
    Clock, CoreError, DailySchedule, DailyTrigger, DecisionKind, DeliveryError, Event, ManualClock,
    MemoryStore, PendingDecision, Presenter, RuntimeOptions, SessionHandle, SessionRuntime,
    SessionState, StaleCommand, StartParams, StopReason, StoreError, ValidationError, WakeError,
    WakeLock,
};

const FAST: StdDuration = StdDuration::from_millis(5);
const WAIT: StdDuration = StdDuration::from_secs(3);

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
}

fn options() -> RuntimeOptions {
    RuntimeOptions {
        tick_interval: FAST,
        wake_grace: Duration::seconds(60),
        event_capacity: 4096,
    }
}

fn spawn(store: &MemoryStore, clock: &ManualClock) -> SessionHandle {
    SessionRuntime::new(store.clone())
        .with_clock(Arc::new(clock.clone()))
        .with_options(options())
        .spawn()
}

fn quarter_hour(total: u32, left: u32) -> StartParams {
    StartParams::new(Duration::milliseconds(900_000), total, left)
}

async fn wait_for_state(handle: &SessionHandle, state: SessionState) {
    tokio::time::timeout(WAIT, async {
        loop {
            if handle.status().await.unwrap().state == state {
                return;
            }
            tokio::time::sleep(FAST).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never reached {state:?}"));
}

async fn next_matching(rx: &mut broadcast::Receiver<Event>, matches: impl Fn(&Event) -> bool) -> Event {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("expected event in time")
}

/// Start a session and let its first countdown run out.
async fn started_and_expired(store: &MemoryStore, clock: &ManualClock, total: u32, left: u32) -> SessionHandle {
    let handle = spawn(store, clock);
    handle.start(quarter_hour(total, left)).await.unwrap();
    clock.advance(Duration::milliseconds(900_000));
    wait_for_state(&handle, SessionState::AwaitingDecision).await;
    handle
}

#[derive(Clone, Default)]
struct RecordingPresenter {
    calls: Arc<Mutex<Vec<String>>>,
    offline: bool,
}

impl RecordingPresenter {
    fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), DeliveryError> {
        if self.offline {
            return Err(DeliveryError("presenter offline".into()));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

impl Presenter for RecordingPresenter {
    fn on_tick(&mut self, _remaining: Duration, _cycle_index: u32, _total: u32) -> Result<(), DeliveryError> {
        if self.offline {
            return Err(DeliveryError("presenter offline".into()));
        }
        Ok(())
    }

    fn on_alert(&mut self, cycle_index: u32, total_cycles: u32) -> Result<(), DeliveryError> {
        self.record(format!("alert {cycle_index}/{total_cycles}"))
    }

    fn on_decision(&mut self, decision: &PendingDecision) -> Result<(), DeliveryError> {
        self.record(format!("decision {} {}", decision.kind, decision.note))
    }
}

#[derive(Clone, Default)]
struct RecordingWakeLock {
    calls: Arc<Mutex<Vec<String>>>,
}

impl WakeLock for RecordingWakeLock {
    fn acquire(&mut self, hold: StdDuration) -> Result<(), WakeError> {
        self.calls.lock().unwrap().push(format!("acquire {}", hold.as_secs()));
        Ok(())
    }

    fn release(&mut self) {
        self.calls.lock().unwrap().push("release".into());
    }
}

#[tokio::test]
async fn start_runs_with_end_time_from_now() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let handle = spawn(&store, &clock);

    let report = handle.start(quarter_hour(32, 32)).await.unwrap();
    assert!(!report.is_stale());
    assert!(matches!(report.events[..], [Event::SessionStarted { .. }]));
    assert_eq!(report.status.state, SessionState::Running);
    assert_eq!(report.status.end_time, Some(t0() + Duration::milliseconds(900_000)));
    assert_eq!(report.status.remaining_ms, Some(900_000));
    assert_eq!(report.status.cycle_index, Some(1));

    let snapshot = load_snapshot(&store).unwrap().unwrap();
    assert_eq!(snapshot.phase, Phase::Running);
    assert_eq!(snapshot.cycles_left, 32);
    assert_eq!(snapshot.end_time, t0() + Duration::milliseconds(900_000));
}

#[tokio::test]
async fn invalid_start_is_rejected_and_leaves_idle() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let handle = spawn(&store, &clock);

    let err = handle
        .start(StartParams::new(Duration::zero(), 4, 4))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(ValidationError::ZeroDuration)));

    let err = handle.start(quarter_hour(4, 9)).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::CyclesOutOfRange { left: 9, total: 4 })
    ));

    assert_eq!(handle.status().await.unwrap().state, SessionState::Idle);
    assert!(store.is_empty());
}

#[tokio::test]
async fn oversized_duration_is_rejected_and_runtime_survives() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let handle = spawn(&store, &clock);

    let huge = StartParams {
        duration_ms: i64::MAX,
        total_cycles: 4,
        cycles_left: 4,
    };
    let err = handle.start(huge).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::DurationOutOfRange { .. })
    ));
    assert_eq!(handle.status().await.unwrap().state, SessionState::Idle);
    assert!(store.is_empty());

    let report = handle.start(quarter_hour(4, 4)).await.unwrap();
    assert_eq!(report.status.state, SessionState::Running);
}

#[tokio::test]
async fn affirmative_decision_starts_next_cycle() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let handle = spawn(&store, &clock);
    let mut events = handle.subscribe();

    handle.start(quarter_hour(32, 32)).await.unwrap();
    clock.advance(Duration::milliseconds(900_000));

    let expired = next_matching(&mut events, |e| matches!(e, Event::CycleExpired { .. })).await;
    assert!(matches!(
        expired,
        Event::CycleExpired {
            cycle_index: 1,
            total_cycles: 32,
            ..
        }
    ));

    // The loop ends with its expiry; nothing may repeat it.
    tokio::time::sleep(FAST * 20).await;
    let mut repeats = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::CycleExpired { .. }) {
            repeats += 1;
        }
    }
    assert_eq!(repeats, 0);

    let now = clock.now();
    let report = handle.respond(DecisionKind::Affirmative, "5 reps").await.unwrap();
    assert!(matches!(
        &report.events[..],
        [
            Event::DecisionAccepted { kind: DecisionKind::Affirmative, note, .. },
            Event::CycleAdvanced { cycles_left: 31, .. },
        ] if note == "5 reps"
    ));
    assert_eq!(report.status.state, SessionState::Running);
    assert_eq!(report.status.cycles_left, 31);
    assert_eq!(report.status.cycle_index, Some(2));
    assert_eq!(report.status.end_time, Some(now + Duration::milliseconds(900_000)));

    let snapshot = load_snapshot(&store).unwrap().unwrap();
    assert_eq!(snapshot.cycles_left, 31);
    assert_eq!(snapshot.end_time, now + Duration::milliseconds(900_000));
}

#[tokio::test]
async fn last_decision_stops_and_clears_snapshot() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let handle = started_and_expired(&store, &clock, 32, 1).await;

    let report = handle.respond(DecisionKind::Negative, "").await.unwrap();
    assert!(matches!(
        report.events.last(),
        Some(Event::SessionStopped {
            reason: StopReason::CyclesExhausted,
            cycles_left: 0,
            ..
        })
    ));
    assert_eq!(report.status.state, SessionState::Stopped);
    assert_eq!(report.status.cycles_left, 0);
    assert_eq!(load_snapshot(&store).unwrap(), None);
}

#[tokio::test]
async fn stop_from_every_state() {
    let clock = ManualClock::new(t0());

    let store = MemoryStore::new();
    let running = spawn(&store, &clock);
    running.start(quarter_hour(8, 8)).await.unwrap();
    let report = running.stop().await.unwrap();
    assert_eq!(report.status.state, SessionState::Stopped);
    assert_eq!(report.status.end_time, None);
    assert_eq!(load_snapshot(&store).unwrap(), None);

    let report = running.stop().await.unwrap();
    assert_eq!(report.stale, Some(StaleCommand::AlreadyStopped));

    let store = MemoryStore::new();
    let awaiting = started_and_expired(&store, &clock, 8, 8).await;
    assert_eq!(awaiting.stop().await.unwrap().status.state, SessionState::Stopped);
    assert_eq!(load_snapshot(&store).unwrap(), None);

    let idle = spawn(&MemoryStore::new(), &clock);
    assert_eq!(idle.stop().await.unwrap().status.state, SessionState::Stopped);
}

#[tokio::test]
async fn stop_cancels_pending_expiry() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let handle = spawn(&store, &clock);
    let mut events = handle.subscribe();

    handle.start(quarter_hour(8, 8)).await.unwrap();
    handle.stop().await.unwrap();
    clock.advance(Duration::minutes(30));
    tokio::time::sleep(FAST * 20).await;

    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, Event::CycleExpired { .. }));
    }
    assert_eq!(handle.status().await.unwrap().state, SessionState::Stopped);
}

#[tokio::test]
async fn restart_restores_running_session_unchanged() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let first = spawn(&store, &clock);
    let started = first.start(quarter_hour(32, 20)).await.unwrap().status;
    first.shutdown().await.unwrap();
    assert!(matches!(first.status().await, Err(CoreError::RuntimeClosed)));

    clock.advance(Duration::minutes(5));
    let second = spawn(&store, &clock);
    let restored = second.status().await.unwrap();
    assert_eq!(restored.state, SessionState::Running);
    assert_eq!(restored.session_id, started.session_id);
    assert_eq!(restored.end_time, started.end_time);
    assert_eq!(restored.cycles_left, 20);
    assert_eq!(restored.remaining_ms, Some(Duration::minutes(10).num_milliseconds()));

    // The countdown is armed again.
    clock.advance(Duration::minutes(10));
    wait_for_state(&second, SessionState::AwaitingDecision).await;
}

#[tokio::test]
async fn restart_after_end_time_awaits_decision() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let first = spawn(&store, &clock);
    first.start(quarter_hour(32, 32)).await.unwrap();
    first.shutdown().await.unwrap();

    clock.advance(Duration::minutes(20));
    let second = spawn(&store, &clock);
    let status = second.status().await.unwrap();
    assert_eq!(status.state, SessionState::AwaitingDecision);
    assert_eq!(status.cycle_index, Some(1));
    assert_eq!(load_snapshot(&store).unwrap().unwrap().phase, Phase::Awaiting);

    let presenter = RecordingPresenter::default();
    let report = second.attach(Box::new(presenter.clone())).await.unwrap();
    let prompt = report.awaiting_decision.expect("prompt for the expired cycle");
    assert_eq!((prompt.cycle_index, prompt.total_cycles), (1, 32));
    assert_eq!(presenter.calls(), vec!["alert 1/32".to_string()]);

    let report = second.respond(DecisionKind::Affirmative, "late").await.unwrap();
    assert_eq!(report.status.cycles_left, 31);
}

#[tokio::test]
async fn unattended_decision_is_resumed_exactly_once() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let handle = started_and_expired(&store, &clock, 32, 32).await;
    handle.respond(DecisionKind::Affirmative, "5 reps").await.unwrap();

    let first = handle.resume_query().await.unwrap();
    let pending = first.pending_decision.expect("decision captured while unattended");
    assert_eq!(pending.kind, DecisionKind::Affirmative);
    assert_eq!(pending.note, "5 reps");
    let active = first.active_session.expect("next cycle is running");
    assert_eq!(active.cycles_left, 31);

    let second = handle.resume_query().await.unwrap();
    assert!(second.pending_decision.is_none());
    assert_eq!(second.active_session, Some(active));
}

#[tokio::test]
async fn attached_presenter_consumes_decision() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let handle = spawn(&store, &clock);
    let presenter = RecordingPresenter::default();
    assert!(handle.attach(Box::new(presenter.clone())).await.unwrap().is_empty());

    handle.start(quarter_hour(4, 4)).await.unwrap();
    clock.advance(Duration::minutes(15));
    wait_for_state(&handle, SessionState::AwaitingDecision).await;
    handle.respond(DecisionKind::Negative, "distracted").await.unwrap();

    assert_eq!(
        presenter.calls(),
        vec!["alert 1/4".to_string(), "decision negative distracted".to_string()]
    );
    assert!(handle.resume_query().await.unwrap().pending_decision.is_none());
    assert!(handle.detach().await.unwrap());
    assert!(!handle.detach().await.unwrap());
}

#[tokio::test]
async fn failing_presenter_never_blocks_the_session() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let handle = spawn(&store, &clock);
    handle.attach(Box::new(RecordingPresenter::offline())).await.unwrap();

    handle.start(quarter_hour(4, 4)).await.unwrap();
    clock.advance(Duration::minutes(15));
    wait_for_state(&handle, SessionState::AwaitingDecision).await;

    let report = handle.respond(DecisionKind::Affirmative, "ok").await.unwrap();
    assert_eq!(report.status.state, SessionState::Running);

    // Undelivered, so it waits for the next consumer.
    let resumed = handle.resume_query().await.unwrap();
    assert_eq!(resumed.pending_decision.map(|d| d.note), Some("ok".to_string()));
}

#[tokio::test]
async fn failed_write_leaves_session_untouched() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let handle = spawn(&store, &clock);
    let before = handle.start(quarter_hour(8, 8)).await.unwrap().status;

    store.fail_writes(true);
    let err = handle.stop().await.unwrap_err();
    assert!(matches!(err, CoreError::Store(StoreError::WriteFailed { .. })));
    let err = handle.start(quarter_hour(2, 2)).await.unwrap_err();
    assert!(matches!(err, CoreError::Store(StoreError::WriteFailed { .. })));

    assert_eq!(handle.status().await.unwrap(), before);
    assert_eq!(load_snapshot(&store).unwrap().unwrap().cycles_left, 8);

    store.fail_writes(false);
    assert_eq!(handle.stop().await.unwrap().status.state, SessionState::Stopped);
}

#[tokio::test]
async fn failed_decision_write_keeps_awaiting() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let handle = started_and_expired(&store, &clock, 8, 8).await;

    store.fail_writes(true);
    assert!(handle.respond(DecisionKind::Affirmative, "x").await.is_err());
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, SessionState::AwaitingDecision);
    assert_eq!(status.cycles_left, 8);

    store.fail_writes(false);
    let report = handle.respond(DecisionKind::Affirmative, "x").await.unwrap();
    assert_eq!(report.status.cycles_left, 7);
}

#[tokio::test]
async fn failed_snapshot_write_after_recorded_decision_keeps_prior_cycle() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let handle = started_and_expired(&store, &clock, 8, 8).await;
    let before = load_snapshot(&store).unwrap().unwrap();

    // The decision lands; the snapshot write after it does not.
    store.fail_writes_after(1);
    let err = handle.respond(DecisionKind::Affirmative, "3 sets").await.unwrap_err();
    assert!(matches!(err, CoreError::Store(StoreError::WriteFailed { .. })));

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, SessionState::AwaitingDecision);
    assert_eq!(status.cycles_left, 8);
    assert_eq!(load_snapshot(&store).unwrap(), Some(before));

    store.fail_writes(false);
    let resumed = handle.resume_query().await.unwrap();
    let pending = resumed.pending_decision.expect("recorded decision survives");
    assert_eq!(pending.kind, DecisionKind::Affirmative);
    assert_eq!(pending.note, "3 sets");
    let prompt = resumed.awaiting_decision.expect("cycle still awaits an answer");
    assert_eq!((prompt.cycle_index, prompt.total_cycles), (1, 8));

    let report = handle.respond(DecisionKind::Affirmative, "3 sets").await.unwrap();
    assert_eq!(report.status.cycles_left, 7);
}

#[tokio::test]
async fn stale_decisions_are_no_ops() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let handle = spawn(&store, &clock);

    let report = handle.respond(DecisionKind::Affirmative, "early").await.unwrap();
    assert_eq!(
        report.stale,
        Some(StaleCommand::NotAwaitingDecision {
            state: SessionState::Idle
        })
    );

    handle.start(quarter_hour(8, 8)).await.unwrap();
    clock.advance(Duration::minutes(15));
    wait_for_state(&handle, SessionState::AwaitingDecision).await;

    let first = handle.respond(DecisionKind::Affirmative, "first").await.unwrap();
    let duplicate = handle.respond(DecisionKind::Negative, "second").await.unwrap();
    assert!(!first.is_stale());
    assert!(duplicate.events.is_empty());
    assert_eq!(
        duplicate.stale,
        Some(StaleCommand::NotAwaitingDecision {
            state: SessionState::Running
        })
    );
    assert_eq!(duplicate.status.cycles_left, 7);

    let pending = handle.resume_query().await.unwrap().pending_decision.unwrap();
    assert_eq!(pending.note, "first");
}

#[tokio::test]
async fn unbounded_session_keeps_looping() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let handle = spawn(&store, &clock);
    handle.start(quarter_hour(0, 0)).await.unwrap();

    for round in 1..=3u32 {
        clock.advance(Duration::minutes(15));
        wait_for_state(&handle, SessionState::AwaitingDecision).await;
        let report = handle.respond(DecisionKind::Affirmative, "").await.unwrap();
        assert_eq!(report.status.state, SessionState::Running);
        assert_eq!(report.status.cycles_completed, round);
        assert_eq!(report.status.cycle_index, Some(round + 1));
    }
}

#[tokio::test]
async fn wake_grant_follows_cycle_lifecycle() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let wake = RecordingWakeLock::default();
    let handle = SessionRuntime::new(store.clone())
        .with_clock(Arc::new(clock.clone()))
        .with_wake_lock(Box::new(wake.clone()))
        .with_options(options())
        .spawn();

    let report = handle.start(quarter_hour(8, 8)).await.unwrap();
    assert!(report.status.wake_held);
    // A restart with the same end time releases before re-acquiring.
    handle.start(quarter_hour(8, 8)).await.unwrap();
    let report = handle.stop().await.unwrap();
    assert!(!report.status.wake_held);

    assert_eq!(
        *wake.calls.lock().unwrap(),
        vec!["acquire 960", "release", "acquire 960", "release"]
    );
}

#[tokio::test]
async fn daily_trigger_starts_full_session() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let handle = spawn(&store, &clock);
    let schedule = DailySchedule {
        enabled: true,
        total_cycles: 12,
        ..DailySchedule::default()
    };

    let report = DailyTrigger::new(handle.clone(), schedule).fire().await.unwrap();
    assert_eq!(report.status.state, SessionState::Running);
    assert_eq!(report.status.total_cycles, 12);
    assert_eq!(report.status.cycles_left, 12);
    assert_eq!(report.status.duration_ms, Some(15 * 60 * 1000));
}

#[tokio::test]
async fn runtime_ends_when_handles_drop() {
    let store = MemoryStore::new();
    let clock = ManualClock::new(t0());
    let handle = spawn(&store, &clock);
    handle.start(quarter_hour(8, 8)).await.unwrap();
    drop(handle);

    // The store keeps the session for the next process.
    tokio::time::sleep(FAST * 10).await;
    assert_eq!(load_snapshot(&store).unwrap().unwrap().phase, Phase::Running);
}
