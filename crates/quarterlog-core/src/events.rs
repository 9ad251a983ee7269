use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::{DecisionKind, SessionState};

/// Every state change of a session produces an Event.
/// Command handlers return them; the runtime broadcasts them to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SessionStarted {
        session_id: String,
        duration_ms: i64,
        total_cycles: u32,
        cycles_left: u32,
        end_time: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// Rebuilt from the store after a restart.
    SessionRestored {
        session_id: String,
        state: SessionState,
        cycles_left: u32,
        end_time: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    },
    Tick {
        remaining_ms: i64,
        cycle_index: u32,
        total_cycles: u32,
    },
    /// Countdown reached zero; a decision is now required.
    CycleExpired {
        cycle_index: u32,
        total_cycles: u32,
        at: DateTime<Utc>,
    },
    DecisionAccepted {
        kind: DecisionKind,
        note: String,
        at: DateTime<Utc>,
    },
    CycleAdvanced {
        cycles_left: u32,
        end_time: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    SessionStopped {
        reason: StopReason,
        cycles_left: u32,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit STOP command.
    Requested,
    /// The last cycle was answered.
    CyclesExhausted,
}
