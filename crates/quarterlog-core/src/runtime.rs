//! Session runtime.
//!
//! A single tokio task owns the store, the state machine, the scheduler and
//! the wake grant. Everything that mutates them arrives as a message on one
//! channel and is handled to completion before the next message is read:
//! START, STOP, RESPOND and RESUME_QUERY from [`SessionHandle`], and tick /
//! expiry events from the scheduler. A STOP that is queued ahead of an
//! in-flight expiry therefore always wins.
//!
//! Commands that change the session follow the same pattern: clone the
//! machine, apply the command to the clone, persist the clone's snapshot, and
//! only then adopt it. A failed write is returned to the caller and leaves the
//! running session exactly as it was.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, DeliveryError, Result};
use crate::events::Event;
use crate::resume::{self, ResumeReport};
use crate::storage::{Config, SessionLock, StateStore};
use crate::timer::snapshot::{clear_snapshot, load_snapshot, save_snapshot};
use crate::timer::{
    decision, CountdownScheduler, CycleMachine, DecisionKind, DecisionOutcome, PendingDecision,
    SchedulerEvent, SessionState, StaleCommand, StartParams, TickKind, TickSink,
};
use crate::wake::{NoopWakeLock, WakeAssurance, WakeLock};

/// Outward calls to whatever is showing the session.
///
/// Failures are logged and otherwise ignored; timing never depends on a
/// responsive presenter.
pub trait Presenter: Send {
    fn on_tick(
        &mut self,
        _remaining: Duration,
        _cycle_index: u32,
        _total_cycles: u32,
    ) -> std::result::Result<(), DeliveryError> {
        Ok(())
    }

    /// The countdown ran out and a decision is needed.
    fn on_alert(&mut self, cycle_index: u32, total_cycles: u32) -> std::result::Result<(), DeliveryError>;

    /// A decision was accepted while attached. Returning `Ok` consumes it.
    fn on_decision(&mut self, _decision: &PendingDecision) -> std::result::Result<(), DeliveryError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub tick_interval: std::time::Duration,
    pub wake_grace: Duration,
    pub event_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            tick_interval: std::time::Duration::from_secs(1),
            wake_grace: Duration::seconds(60),
            event_capacity: 256,
        }
    }
}

impl RuntimeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_interval: config.timer.tick_interval(),
            wake_grace: config.wake.grace(),
            ..Self::default()
        }
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub total_cycles: u32,
    pub cycles_left: u32,
    pub cycles_completed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<i64>,
    pub wake_held: bool,
}

/// Result of a control command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReport {
    pub events: Vec<Event>,
    pub status: SessionStatus,
    /// Set when the command was ignored as a no-op.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale: Option<StaleCommand>,
}

impl CommandReport {
    pub fn is_stale(&self) -> bool {
        self.stale.is_some()
    }
}

enum Command {
    Start {
        params: StartParams,
        reply: oneshot::Sender<Result<CommandReport>>,
    },
    Stop {
        reply: oneshot::Sender<Result<CommandReport>>,
    },
    Respond {
        kind: DecisionKind,
        note: String,
        reply: oneshot::Sender<Result<CommandReport>>,
    },
    ResumeQuery {
        reply: oneshot::Sender<Result<ResumeReport>>,
    },
    Attach {
        presenter: Box<dyn Presenter>,
        reply: oneshot::Sender<Result<ResumeReport>>,
    },
    Detach {
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Message {
    Command(Command),
    Scheduler(SchedulerEvent),
}

/// Feeds scheduler events back into the runtime's queue.
///
/// Holds a weak sender so the runtime ends once every handle is dropped.
struct QueueSink(mpsc::WeakUnboundedSender<Message>);

impl TickSink for QueueSink {
    fn deliver(&self, event: SchedulerEvent) -> bool {
        match self.0.upgrade() {
            Some(tx) => tx.send(Message::Scheduler(event)).is_ok(),
            None => false,
        }
    }
}

/// Builder for the session runtime task.
pub struct SessionRuntime {
    store: Box<dyn StateStore>,
    clock: Arc<dyn Clock>,
    wake_lock: Box<dyn WakeLock>,
    session_lock: Option<SessionLock>,
    options: RuntimeOptions,
}

impl SessionRuntime {
    pub fn new(store: impl StateStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            clock: Arc::new(SystemClock),
            wake_lock: Box::new(NoopWakeLock),
            session_lock: None,
            options: RuntimeOptions::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_wake_lock(mut self, wake_lock: Box<dyn WakeLock>) -> Self {
        self.wake_lock = wake_lock;
        self
    }

    /// Hold `lock` for as long as the runtime task runs.
    pub fn with_session_lock(mut self, lock: SessionLock) -> Self {
        self.session_lock = Some(lock);
        self
    }

    pub fn with_options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    /// Restore the persisted session and start the runtime task.
    ///
    /// Restoration finishes before this returns, so the first command sent
    /// through the handle already sees the restored state. Must be called
    /// from within a tokio runtime.
    pub fn spawn(self) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(self.options.event_capacity.max(1));

        let sink: Arc<dyn TickSink> = Arc::new(QueueSink(tx.downgrade()));
        let scheduler =
            CountdownScheduler::new(Arc::clone(&self.clock), sink, self.options.tick_interval);

        let mut actor = Actor {
            store: self.store,
            clock: self.clock,
            machine: CycleMachine::new(),
            scheduler,
            wake: WakeAssurance::new(self.wake_lock, self.options.wake_grace),
            presenter: None,
            events: events.clone(),
            _session_lock: self.session_lock,
        };
        actor.restore();
        tokio::spawn(actor.run(rx));

        SessionHandle { tx, events }
    }
}

/// Cloneable control surface of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Message>,
    events: broadcast::Sender<Event>,
}

impl SessionHandle {
    /// Receive every event the session produces from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// START: begin a session, replacing any current one.
    pub async fn start(&self, params: StartParams) -> Result<CommandReport> {
        self.request(|reply| Command::Start { params, reply }).await?
    }

    /// STOP: end the session from any state.
    pub async fn stop(&self) -> Result<CommandReport> {
        self.request(|reply| Command::Stop { reply }).await?
    }

    /// RESPOND: answer the expired cycle.
    pub async fn respond(&self, kind: DecisionKind, note: impl Into<String>) -> Result<CommandReport> {
        let note = note.into();
        self.request(|reply| Command::Respond { kind, note, reply })
            .await?
    }

    /// RESUME_QUERY: claim the pending decision and report the live session.
    pub async fn resume_query(&self) -> Result<ResumeReport> {
        self.request(|reply| Command::ResumeQuery { reply }).await?
    }

    /// Attach a presenter, replacing any attached one, and reconcile.
    pub async fn attach(&self, presenter: Box<dyn Presenter>) -> Result<ResumeReport> {
        self.request(|reply| Command::Attach { presenter, reply })
            .await?
    }

    /// Returns whether a presenter was attached.
    pub async fn detach(&self) -> Result<bool> {
        self.request(|reply| Command::Detach { reply }).await
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Stop the runtime task. The persisted session is left in place.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Message::Command(make(reply)))
            .map_err(|_| CoreError::RuntimeClosed)?;
        response.await.map_err(|_| CoreError::RuntimeClosed)
    }
}

struct Actor {
    store: Box<dyn StateStore>,
    clock: Arc<dyn Clock>,
    machine: CycleMachine,
    scheduler: CountdownScheduler,
    wake: WakeAssurance,
    presenter: Option<Box<dyn Presenter>>,
    events: broadcast::Sender<Event>,
    _session_lock: Option<SessionLock>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = rx.recv().await {
            self.wake.release_if_lapsed(self.clock.now());
            match message {
                Message::Scheduler(event) => self.on_scheduler(event),
                Message::Command(Command::Start { params, reply }) => {
                    let _ = reply.send(self.start(params));
                }
                Message::Command(Command::Stop { reply }) => {
                    let _ = reply.send(self.stop());
                }
                Message::Command(Command::Respond { kind, note, reply }) => {
                    let _ = reply.send(self.respond(kind, note));
                }
                Message::Command(Command::ResumeQuery { reply }) => {
                    let _ = reply.send(self.resume_query());
                }
                Message::Command(Command::Attach { presenter, reply }) => {
                    let _ = reply.send(self.attach(presenter));
                }
                Message::Command(Command::Detach { reply }) => {
                    let _ = reply.send(self.presenter.take().is_some());
                }
                Message::Command(Command::Status { reply }) => {
                    let _ = reply.send(self.status());
                }
                Message::Command(Command::Shutdown { reply }) => {
                    self.scheduler.disarm();
                    self.wake.release();
                    let _ = reply.send(());
                    break;
                }
            }
        }
        self.scheduler.disarm();
        info!("session runtime stopped");
    }

    /// Rebuild the in-memory session from the store.
    fn restore(&mut self) {
        let now = self.clock.now();
        let snapshot = match load_snapshot(self.store.as_ref()) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "could not read persisted session, starting idle");
                return;
            }
        };

        let machine = CycleMachine::restore(&snapshot, now);
        if machine.state() == SessionState::AwaitingDecision {
            // Expired while nobody was running; record that it is awaiting.
            if let Some(awaiting) = machine.snapshot() {
                if let Err(e) = save_snapshot(self.store.as_mut(), &awaiting) {
                    warn!(error = %e, "could not persist awaiting phase");
                }
            }
        }
        self.machine = machine;

        if let Some(end_time) = self.machine.end_time() {
            self.scheduler.arm(end_time);
            self.wake.acquire_until(now, end_time);
        }

        info!(
            session_id = %snapshot.id,
            state = ?self.machine.state(),
            cycles_left = snapshot.cycles_left,
            "session restored"
        );
        self.emit(Event::SessionRestored {
            session_id: snapshot.id,
            state: self.machine.state(),
            cycles_left: snapshot.cycles_left,
            end_time: self.machine.end_time(),
            at: now,
        });
    }

    fn start(&mut self, params: StartParams) -> Result<CommandReport> {
        let now = self.clock.now();
        let mut next = self.machine.clone();
        let event = next.start(params, now)?;
        if let Some(snapshot) = next.snapshot() {
            save_snapshot(self.store.as_mut(), &snapshot)?;
        }
        self.machine = next;
        self.arm(now);

        info!(
            duration_ms = params.duration_ms,
            total_cycles = params.total_cycles,
            cycles_left = params.cycles_left,
            "session started"
        );
        self.emit(event.clone());
        Ok(self.report(vec![event], None))
    }

    fn stop(&mut self) -> Result<CommandReport> {
        let now = self.clock.now();
        let mut next = self.machine.clone();
        let event = match next.stop(now) {
            Ok(event) => event,
            Err(stale) => {
                debug!(reason = %stale, "ignoring stop");
                return Ok(self.report(Vec::new(), Some(stale)));
            }
        };
        clear_snapshot(self.store.as_mut())?;
        self.machine = next;
        self.scheduler.disarm();
        self.wake.release();

        info!("session stopped");
        self.emit(event.clone());
        Ok(self.report(vec![event], None))
    }

    fn respond(&mut self, kind: DecisionKind, note: String) -> Result<CommandReport> {
        let state = self.machine.state();
        if state != SessionState::AwaitingDecision {
            let stale = StaleCommand::NotAwaitingDecision { state };
            debug!(reason = %stale, "ignoring decision");
            return Ok(self.report(Vec::new(), Some(stale)));
        }

        let now = self.clock.now();
        let pending = PendingDecision::new(kind, note, now);
        // Recorded before the session moves on, so a crash in between still
        // leaves the decision recoverable next to the prior snapshot.
        decision::record(self.store.as_mut(), &pending)?;
        let delivered = self.deliver_decision(&pending);

        let mut next = self.machine.clone();
        let outcome = match next.accept_decision(now) {
            Ok(outcome) => outcome,
            Err(stale) => return Ok(self.report(Vec::new(), Some(stale))),
        };
        match &outcome {
            DecisionOutcome::Continued(_) => {
                if let Some(snapshot) = next.snapshot() {
                    save_snapshot(self.store.as_mut(), &snapshot)?;
                }
            }
            DecisionOutcome::Finished(_) => clear_snapshot(self.store.as_mut())?,
        }
        self.machine = next;

        let accepted = Event::DecisionAccepted {
            kind,
            note: pending.note.clone(),
            at: now,
        };
        let follow_up = match outcome {
            DecisionOutcome::Continued(event) => {
                self.arm(now);
                event
            }
            DecisionOutcome::Finished(event) => {
                self.scheduler.disarm();
                self.wake.release();
                event
            }
        };

        if delivered {
            if let Err(e) = decision::clear(self.store.as_mut()) {
                warn!(error = %e, "could not clear delivered decision");
            }
        }

        info!(
            kind = %kind,
            state = ?self.machine.state(),
            cycles_left = self.machine.session().map_or(0, |s| s.cycles_left),
            "decision accepted"
        );
        self.emit(accepted.clone());
        self.emit(follow_up.clone());
        Ok(self.report(vec![accepted, follow_up], None))
    }

    fn resume_query(&mut self) -> Result<ResumeReport> {
        let report = resume::reconcile(self.store.as_mut(), self.clock.now())?;
        Ok(report)
    }

    fn attach(&mut self, presenter: Box<dyn Presenter>) -> Result<ResumeReport> {
        let report = resume::reconcile(self.store.as_mut(), self.clock.now())?;
        self.presenter = Some(presenter);
        debug!("presenter attached");

        if self.machine.state() == SessionState::AwaitingDecision {
            self.alert();
        }
        Ok(report)
    }

    fn on_scheduler(&mut self, event: SchedulerEvent) {
        match event.kind {
            TickKind::Tick { remaining } => {
                if !self.scheduler.is_current(event.generation) {
                    debug!(generation = event.generation, "dropping residual tick");
                    return;
                }
                self.tick(remaining);
            }
            TickKind::Expired => {
                if !self.scheduler.take_expiry(event.generation) {
                    debug!(generation = event.generation, "dropping residual expiry");
                    return;
                }
                self.expire();
            }
        }
    }

    fn tick(&mut self, remaining: Duration) {
        let Some(session) = self.machine.session() else {
            return;
        };
        let (cycle_index, total_cycles) = (session.cycle_index(), session.total_cycles);
        if let Some(presenter) = self.presenter.as_mut() {
            if let Err(e) = presenter.on_tick(remaining, cycle_index, total_cycles) {
                warn!(error = %e, "tick delivery failed");
            }
        }
        self.emit(Event::Tick {
            remaining_ms: remaining.num_milliseconds(),
            cycle_index,
            total_cycles,
        });
    }

    fn expire(&mut self) {
        let now = self.clock.now();
        let mut next = self.machine.clone();
        let Some(event) = next.expire(now) else {
            return;
        };
        if let Some(snapshot) = next.snapshot() {
            // Restore treats a lapsed running snapshot as awaiting anyway.
            if let Err(e) = save_snapshot(self.store.as_mut(), &snapshot) {
                warn!(error = %e, "could not persist expiry");
            }
        }
        self.machine = next;

        info!(state = ?self.machine.state(), "cycle expired");
        self.alert();
        self.emit(event);
    }

    fn alert(&mut self) {
        let Some(session) = self.machine.session() else {
            return;
        };
        let (cycle_index, total_cycles) = (session.cycle_index(), session.total_cycles);
        if let Some(presenter) = self.presenter.as_mut() {
            if let Err(e) = presenter.on_alert(cycle_index, total_cycles) {
                warn!(error = %e, "alert delivery failed");
            }
        }
    }

    fn deliver_decision(&mut self, pending: &PendingDecision) -> bool {
        let Some(presenter) = self.presenter.as_mut() else {
            return false;
        };
        match presenter.on_decision(pending) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "decision delivery failed, leaving it pending");
                false
            }
        }
    }

    /// Arm the scheduler and wake grant for the current cycle.
    fn arm(&mut self, now: DateTime<Utc>) {
        if let Some(end_time) = self.machine.end_time() {
            self.scheduler.arm(end_time);
            self.wake.acquire_until(now, end_time);
        }
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn status(&self) -> SessionStatus {
        let now = self.clock.now();
        let state = self.machine.state();
        let session = self.machine.session();
        let live = matches!(state, SessionState::Running | SessionState::AwaitingDecision);
        SessionStatus {
            state,
            session_id: session.map(|s| s.id.clone()),
            duration_ms: session.map(|s| s.duration.num_milliseconds()),
            total_cycles: session.map_or(0, |s| s.total_cycles),
            cycles_left: session.map_or(0, |s| s.cycles_left),
            cycles_completed: session.map_or(0, |s| s.cycles_completed),
            cycle_index: session.filter(|_| live).map(|s| s.cycle_index()),
            end_time: self.machine.end_time(),
            remaining_ms: self.machine.remaining(now).map(|r| r.num_milliseconds()),
            wake_held: self.wake.is_held(),
        }
    }

    fn report(&self, events: Vec<Event>, stale: Option<StaleCommand>) -> CommandReport {
        CommandReport {
            events,
            status: self.status(),
            stale,
        }
    }
}
