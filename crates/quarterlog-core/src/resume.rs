//! Resume reconciliation.
//!
//! Run once whenever a consumer attaches, including on cold start. It claims
//! the pending decision (if any) and reports the live session so the consumer
//! can pick up the countdown where it is instead of re-deriving it. The only
//! thing it ever writes is the removal of the decision it claimed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::storage::StateStore;
use crate::timer::snapshot::{load_snapshot, Phase};
use crate::timer::{decision, PendingDecision};

/// A session whose countdown is still running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub end_time: DateTime<Utc>,
    pub cycles_left: u32,
    pub total_cycles: u32,
}

/// A session whose countdown ran out and still needs an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwaitingPrompt {
    pub cycle_index: u32,
    pub total_cycles: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeReport {
    /// Captured while no consumer was attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_decision: Option<PendingDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_session: Option<ActiveSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awaiting_decision: Option<AwaitingPrompt>,
}

impl ResumeReport {
    /// Nothing to surface: idle, or cleanly stopped.
    pub fn is_empty(&self) -> bool {
        self.pending_decision.is_none()
            && self.active_session.is_none()
            && self.awaiting_decision.is_none()
    }
}

/// Claim the pending decision and describe the persisted session.
pub fn reconcile(store: &mut dyn StateStore, now: DateTime<Utc>) -> Result<ResumeReport, StoreError> {
    let pending_decision = decision::peek_and_clear(store)?;

    let mut report = ResumeReport {
        pending_decision,
        ..ResumeReport::default()
    };

    if let Some(snapshot) = load_snapshot(store)? {
        if snapshot.phase == Phase::Running && snapshot.end_time > now {
            report.active_session = Some(ActiveSession {
                end_time: snapshot.end_time,
                cycles_left: snapshot.cycles_left,
                total_cycles: snapshot.total_cycles,
            });
        } else {
            report.awaiting_decision = Some(AwaitingPrompt {
                cycle_index: snapshot.cycle_index(),
                total_cycles: snapshot.total_cycles,
            });
        }
    }

    Ok(report)
}
