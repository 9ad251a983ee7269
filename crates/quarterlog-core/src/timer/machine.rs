//! Cycle state machine.
//!
//! Pure session logic with no I/O: every command takes the current time and
//! returns the event it produced. The runtime persists the resulting snapshot
//! before it adopts the new state, so a failed write leaves the previous state
//! in force.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Running -> AwaitingDecision -> Running ... -> Stopped
//!            \              \
//!             +-- stop ------+--------------------------> Stopped
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::snapshot::{Phase, SessionSnapshot};
use crate::error::ValidationError;
use crate::events::{Event, StopReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    AwaitingDecision,
    Stopped,
}

/// Longest cycle a session may run.
pub const MAX_CYCLE_DURATION_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// 1-based index of the cycle in progress, as shown to the user.
pub fn cycle_index(total_cycles: u32, cycles_left: u32, cycles_completed: u32) -> u32 {
    if total_cycles > 0 {
        (total_cycles - cycles_left.min(total_cycles) + 1).max(1)
    } else {
        cycles_completed.saturating_add(1)
    }
}

/// Parameters of a START command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartParams {
    pub duration_ms: i64,
    /// 0 means unbounded.
    pub total_cycles: u32,
    pub cycles_left: u32,
}

impl StartParams {
    pub fn new(duration: Duration, total_cycles: u32, cycles_left: u32) -> Self {
        Self {
            duration_ms: duration.num_milliseconds(),
            total_cycles,
            cycles_left,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::try_milliseconds(self.duration_ms).unwrap_or_else(Duration::zero)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.duration_ms <= 0 {
            return Err(ValidationError::ZeroDuration);
        }
        if self.duration_ms > MAX_CYCLE_DURATION_MS {
            return Err(self.out_of_range());
        }
        if self.total_cycles > 0 {
            if self.cycles_left > self.total_cycles {
                return Err(ValidationError::CyclesOutOfRange {
                    left: self.cycles_left,
                    total: self.total_cycles,
                });
            }
            if self.cycles_left == 0 {
                return Err(ValidationError::NoCyclesLeft {
                    total: self.total_cycles,
                });
            }
        }
        Ok(())
    }

    fn out_of_range(&self) -> ValidationError {
        ValidationError::DurationOutOfRange {
            duration_ms: self.duration_ms,
            max_ms: MAX_CYCLE_DURATION_MS,
        }
    }
}

/// A command that arrived in a state where it has no meaning.
///
/// Benign: duplicate delivery, or a late arrival after STOP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StaleCommand {
    #[error("no decision is awaited while the session is {state:?}")]
    NotAwaitingDecision { state: SessionState },
    #[error("session is already stopped")]
    AlreadyStopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    /// Next cycle armed.
    Continued(Event),
    /// Last cycle answered; the session is over.
    Finished(Event),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSession {
    pub id: String,
    pub duration: Duration,
    pub total_cycles: u32,
    pub cycles_left: u32,
    pub cycles_completed: u32,
    pub end_time: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

impl CycleSession {
    pub fn cycle_index(&self) -> u32 {
        cycle_index(self.total_cycles, self.cycles_left, self.cycles_completed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CycleMachine {
    state: SessionState,
    session: Option<CycleSession>,
}

impl CycleMachine {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&CycleSession> {
        self.session.as_ref()
    }

    /// `end_time` only while running; stale values are hidden.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        match self.state {
            SessionState::Running => self.session.as_ref().map(|s| s.end_time),
            _ => None,
        }
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.end_time()
            .map(|end| (end - now).max(Duration::zero()))
    }

    /// What the store should hold right now. `None` means "no live session".
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let phase = match self.state {
            SessionState::Running => Phase::Running,
            SessionState::AwaitingDecision => Phase::Awaiting,
            SessionState::Idle | SessionState::Stopped => return None,
        };
        let session = self.session.as_ref()?;
        Some(SessionSnapshot {
            id: session.id.clone(),
            duration_ms: session.duration.num_milliseconds(),
            total_cycles: session.total_cycles,
            cycles_left: session.cycles_left,
            cycles_completed: session.cycles_completed,
            end_time: session.end_time,
            phase,
            started_at: session.started_at,
        })
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Begin a fresh session, overwriting whatever was there.
    pub fn start(&mut self, params: StartParams, now: DateTime<Utc>) -> Result<Event, ValidationError> {
        params.validate()?;
        let duration = params.duration();
        let end_time = now
            .checked_add_signed(duration)
            .ok_or_else(|| params.out_of_range())?;
        let cycles_left = if params.total_cycles > 0 {
            params.cycles_left
        } else {
            0
        };
        let session = CycleSession {
            id: uuid::Uuid::new_v4().to_string(),
            duration,
            total_cycles: params.total_cycles,
            cycles_left,
            cycles_completed: 0,
            end_time,
            started_at: now,
        };
        let event = Event::SessionStarted {
            session_id: session.id.clone(),
            duration_ms: params.duration_ms,
            total_cycles: session.total_cycles,
            cycles_left: session.cycles_left,
            end_time: session.end_time,
            at: now,
        };
        self.session = Some(session);
        self.state = SessionState::Running;
        Ok(event)
    }

    /// The countdown reached zero. Only meaningful while running.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Option<Event> {
        if self.state != SessionState::Running {
            return None;
        }
        let session = self.session.as_ref()?;
        let event = Event::CycleExpired {
            cycle_index: session.cycle_index(),
            total_cycles: session.total_cycles,
            at: now,
        };
        self.state = SessionState::AwaitingDecision;
        Some(event)
    }

    /// Apply an accepted decision: loop into the next cycle or finish.
    pub fn accept_decision(&mut self, now: DateTime<Utc>) -> Result<DecisionOutcome, StaleCommand> {
        let state = self.state;
        let session = match (state, self.session.as_mut()) {
            (SessionState::AwaitingDecision, Some(session)) => session,
            _ => return Err(StaleCommand::NotAwaitingDecision { state }),
        };

        session.cycles_completed = session.cycles_completed.saturating_add(1);

        if session.total_cycles > 0 {
            session.cycles_left = session.cycles_left.saturating_sub(1);
            if session.cycles_left == 0 {
                self.state = SessionState::Stopped;
                return Ok(DecisionOutcome::Finished(Event::SessionStopped {
                    reason: StopReason::CyclesExhausted,
                    cycles_left: 0,
                    at: now,
                }));
            }
        }

        session.end_time = now
            .checked_add_signed(session.duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.state = SessionState::Running;
        Ok(DecisionOutcome::Continued(Event::CycleAdvanced {
            cycles_left: session.cycles_left,
            end_time: session.end_time,
            at: now,
        }))
    }

    /// Terminate from any state other than `Stopped`.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<Event, StaleCommand> {
        if self.state == SessionState::Stopped {
            return Err(StaleCommand::AlreadyStopped);
        }
        self.state = SessionState::Stopped;
        Ok(Event::SessionStopped {
            reason: StopReason::Requested,
            cycles_left: self.session.as_ref().map_or(0, |s| s.cycles_left),
            at: now,
        })
    }

    /// Rebuild from a persisted snapshot.
    ///
    /// A running snapshot whose `end_time` has passed comes back awaiting a
    /// decision: the countdown expired while nobody was watching.
    pub fn restore(snapshot: &SessionSnapshot, now: DateTime<Utc>) -> Self {
        let state = match snapshot.phase {
            Phase::Running if snapshot.end_time > now => SessionState::Running,
            _ => SessionState::AwaitingDecision,
        };
        Self {
            state,
            session: Some(CycleSession {
                id: snapshot.id.clone(),
                duration: snapshot.duration(),
                total_cycles: snapshot.total_cycles,
                cycles_left: snapshot.cycles_left,
                cycles_completed: snapshot.cycles_completed,
                end_time: snapshot.end_time,
                started_at: snapshot.started_at,
            }),
        }
    }
}
