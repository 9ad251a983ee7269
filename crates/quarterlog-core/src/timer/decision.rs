//! Decision exchange.
//!
//! A decision answers one expired cycle. Once accepted it is written to the
//! store as the pending-decision group, and it stays there until a consumer
//! claims it with [`peek_and_clear`]. Its presence is the only signal that a
//! decision has not been delivered to the UI yet.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{from_epoch_ms, to_epoch_ms};
use crate::error::{StoreError, ValidationError};
use crate::storage::keys::{
    DECISION_CAPTURED_AT_MS, DECISION_GROUP, DECISION_KEYS, DECISION_KIND, DECISION_NOTE,
};
use crate::storage::{parse_value, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// "Done" / win.
    Affirmative,
    /// "Miss" / loss.
    Negative,
}

impl DecisionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionKind::Affirmative => "affirmative",
            DecisionKind::Negative => "negative",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "affirmative" | "done" | "win" | "yes" | "y" => Ok(DecisionKind::Affirmative),
            "negative" | "miss" | "loss" | "no" | "n" => Ok(DecisionKind::Negative),
            other => Err(ValidationError::InvalidValue {
                field: "kind".into(),
                message: format!("'{other}' is not a decision (done|miss)"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDecision {
    pub kind: DecisionKind,
    pub note: String,
    pub captured_at: DateTime<Utc>,
}

impl PendingDecision {
    pub fn new(kind: DecisionKind, note: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            note: note.into(),
            captured_at,
        }
    }

    fn from_values(values: &[Option<String>]) -> Result<Option<Self>, StoreError> {
        let [kind, note, captured_at] = values else {
            return Ok(None);
        };
        let Some(kind) = kind else {
            return Ok(None);
        };
        let kind = DecisionKind::from_str(kind).map_err(|e| StoreError::Corrupt {
            key: DECISION_KIND.to_string(),
            message: e.to_string(),
        })?;
        let captured_at = match captured_at {
            Some(raw) => {
                let ms: i64 = parse_value(DECISION_CAPTURED_AT_MS, raw)?;
                from_epoch_ms(ms).ok_or_else(|| StoreError::Corrupt {
                    key: DECISION_CAPTURED_AT_MS.to_string(),
                    message: format!("timestamp {ms} out of range"),
                })?
            }
            None => {
                return Err(StoreError::Corrupt {
                    key: DECISION_CAPTURED_AT_MS.to_string(),
                    message: "missing from decision group".into(),
                })
            }
        };
        Ok(Some(Self {
            kind,
            note: note.clone().unwrap_or_default(),
            captured_at,
        }))
    }
}

/// Persist `decision` as the pending decision, replacing any earlier one.
pub fn record(store: &mut dyn StateStore, decision: &PendingDecision) -> Result<(), StoreError> {
    store.put(
        DECISION_GROUP,
        &[
            (DECISION_KIND, decision.kind.as_str().to_string()),
            (DECISION_NOTE, decision.note.clone()),
            (DECISION_CAPTURED_AT_MS, to_epoch_ms(decision.captured_at).to_string()),
        ],
    )
}

/// Read without consuming.
pub fn peek(store: &dyn StateStore) -> Result<Option<PendingDecision>, StoreError> {
    let values = DECISION_KEYS
        .iter()
        .map(|key| store.get(key))
        .collect::<Result<Vec<_>, _>>()?;
    PendingDecision::from_values(&values)
}

/// Read and delete in one step. `None` when nothing is pending.
pub fn peek_and_clear(store: &mut dyn StateStore) -> Result<Option<PendingDecision>, StoreError> {
    let values = store.take(DECISION_GROUP, DECISION_KEYS)?;
    PendingDecision::from_values(&values)
}

pub fn clear(store: &mut dyn StateStore) -> Result<(), StoreError> {
    store.delete(DECISION_GROUP, DECISION_KEYS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    fn decision() -> PendingDecision {
        PendingDecision::new(
            DecisionKind::Affirmative,
            "5 reps",
            from_epoch_ms(1_700_000_000_500).unwrap(),
        )
    }

    #[test]
    fn peek_and_clear_consumes_exactly_once() {
        let mut db = Database::open_memory().unwrap();
        record(&mut db, &decision()).unwrap();

        assert_eq!(peek(&db).unwrap(), Some(decision()));
        assert_eq!(peek_and_clear(&mut db).unwrap(), Some(decision()));
        assert_eq!(peek_and_clear(&mut db).unwrap(), None);
    }

    #[test]
    fn later_record_replaces_earlier() {
        let mut db = Database::open_memory().unwrap();
        record(&mut db, &decision()).unwrap();
        let newer = PendingDecision::new(DecisionKind::Negative, "", decision().captured_at);
        record(&mut db, &newer).unwrap();
        assert_eq!(peek_and_clear(&mut db).unwrap(), Some(newer));
    }

    #[test]
    fn empty_note_survives_roundtrip() {
        let mut db = Database::open_memory().unwrap();
        let quiet = PendingDecision::new(DecisionKind::Negative, "", decision().captured_at);
        record(&mut db, &quiet).unwrap();
        assert_eq!(peek(&db).unwrap().unwrap().note, "");
    }

    #[test]
    fn kind_parses_user_spellings() {
        assert_eq!("done".parse::<DecisionKind>(), Ok(DecisionKind::Affirmative));
        assert_eq!("WIN".parse::<DecisionKind>(), Ok(DecisionKind::Affirmative));
        assert_eq!("miss".parse::<DecisionKind>(), Ok(DecisionKind::Negative));
        assert!("maybe".parse::<DecisionKind>().is_err());
    }
}
