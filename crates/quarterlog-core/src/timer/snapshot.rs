//! Persisted session snapshot.
//!
//! The store is the source of truth for a live session; the in-memory machine
//! is a cache rebuilt from this group at startup. The group is always written
//! and deleted as a unit.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::machine::{cycle_index, MAX_CYCLE_DURATION_MS};
use crate::clock::{from_epoch_ms, to_epoch_ms};
use crate::error::StoreError;
use crate::storage::keys::{
    SESSION_CYCLES_COMPLETED, SESSION_CYCLES_LEFT, SESSION_DURATION_MS, SESSION_END_TIME_MS,
    SESSION_GROUP, SESSION_ID, SESSION_KEYS, SESSION_PHASE, SESSION_STARTED_AT_MS,
    SESSION_TOTAL_CYCLES,
};
use crate::storage::{parse_value, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Running,
    Awaiting,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Running => "running",
            Phase::Awaiting => "awaiting",
        }
    }

    fn parse(raw: &str) -> Result<Self, StoreError> {
        match raw {
            "running" => Ok(Phase::Running),
            "awaiting" => Ok(Phase::Awaiting),
            other => Err(StoreError::Corrupt {
                key: SESSION_PHASE.to_string(),
                message: format!("unknown phase '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub duration_ms: i64,
    pub total_cycles: u32,
    pub cycles_left: u32,
    pub cycles_completed: u32,
    pub end_time: DateTime<Utc>,
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn duration(&self) -> Duration {
        Duration::try_milliseconds(self.duration_ms).unwrap_or_else(Duration::zero)
    }

    /// 1-based index of the cycle this snapshot is on.
    pub fn cycle_index(&self) -> u32 {
        cycle_index(self.total_cycles, self.cycles_left, self.cycles_completed)
    }

    fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            (SESSION_ID, self.id.clone()),
            (SESSION_DURATION_MS, self.duration_ms.to_string()),
            (SESSION_TOTAL_CYCLES, self.total_cycles.to_string()),
            (SESSION_CYCLES_LEFT, self.cycles_left.to_string()),
            (SESSION_CYCLES_COMPLETED, self.cycles_completed.to_string()),
            (SESSION_END_TIME_MS, to_epoch_ms(self.end_time).to_string()),
            (SESSION_PHASE, self.phase.as_str().to_string()),
            (SESSION_STARTED_AT_MS, to_epoch_ms(self.started_at).to_string()),
        ]
    }
}

/// Overwrite the session group.
pub fn save_snapshot(store: &mut dyn StateStore, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
    store.put(SESSION_GROUP, &snapshot.entries())
}

pub fn clear_snapshot(store: &mut dyn StateStore) -> Result<(), StoreError> {
    store.delete(SESSION_GROUP, SESSION_KEYS)
}

/// Read the session group. `Ok(None)` when no session is persisted.
pub fn load_snapshot(store: &dyn StateStore) -> Result<Option<SessionSnapshot>, StoreError> {
    let Some(phase) = store.get(SESSION_PHASE)? else {
        return Ok(None);
    };

    let required = |key: &str| -> Result<String, StoreError> {
        store.get(key)?.ok_or_else(|| StoreError::Corrupt {
            key: key.to_string(),
            message: "missing from session group".into(),
        })
    };
    let timestamp = |key: &str| -> Result<DateTime<Utc>, StoreError> {
        let ms: i64 = parse_value(key, &required(key)?)?;
        from_epoch_ms(ms).ok_or_else(|| StoreError::Corrupt {
            key: key.to_string(),
            message: format!("timestamp {ms} out of range"),
        })
    };

    let duration_ms: i64 = parse_value(SESSION_DURATION_MS, &required(SESSION_DURATION_MS)?)?;
    if duration_ms <= 0 || duration_ms > MAX_CYCLE_DURATION_MS {
        return Err(StoreError::Corrupt {
            key: SESSION_DURATION_MS.to_string(),
            message: format!("cycle duration {duration_ms}ms out of range"),
        });
    }

    Ok(Some(SessionSnapshot {
        id: required(SESSION_ID)?,
        duration_ms,
        total_cycles: parse_value(SESSION_TOTAL_CYCLES, &required(SESSION_TOTAL_CYCLES)?)?,
        cycles_left: parse_value(SESSION_CYCLES_LEFT, &required(SESSION_CYCLES_LEFT)?)?,
        cycles_completed: parse_value(
            SESSION_CYCLES_COMPLETED,
            &required(SESSION_CYCLES_COMPLETED)?,
        )?,
        end_time: timestamp(SESSION_END_TIME_MS)?,
        phase: Phase::parse(&phase)?,
        started_at: timestamp(SESSION_STARTED_AT_MS)?,
    }))
}
