//! QuarterLog Core Library
//!
//! Repeating check-in cycles: a countdown runs for a fixed duration, the user
//! answers done/miss with an optional note, and the next cycle starts until
//! the configured number of cycles is used up or the session is stopped.
//!
//! The persisted store is the source of truth for a live session, so the
//! process can die at any point and pick the session back up on restart.
//!
//! # Modules
//!
//! - [`timer`]: state machine, countdown scheduler, decision exchange
//! - [`runtime`]: single-writer session task and its handle
//! - [`resume`]: reconciliation when a consumer attaches
//! - [`storage`]: SQLite store and TOML configuration
//! - [`wake`]: keeping the host awake through a cycle
//! - [`daily`]: daily auto-start trigger

pub mod clock;
pub mod daily;
pub mod error;
pub mod events;
pub mod resume;
pub mod runtime;
pub mod storage;
pub mod timer;
pub mod wake;

pub use clock::{Clock, ManualClock, SystemClock};
pub use daily::{DailySchedule, DailyTrigger};
pub use error::{ConfigError, CoreError, DeliveryError, StoreError, ValidationError, WakeError};
pub use events::{Event, StopReason};
pub use resume::{ActiveSession, AwaitingPrompt, ResumeReport};
pub use runtime::{
    CommandReport, Presenter, RuntimeOptions, SessionHandle, SessionRuntime, SessionStatus,
};
pub use storage::{Config, Database, MemoryStore, SessionLock, StateStore};
pub use timer::{
    CycleMachine, DecisionKind, PendingDecision, SessionState, StaleCommand, StartParams,
};
pub use wake::{CommandWakeLock, NoopWakeLock, WakeAssurance, WakeLock};
