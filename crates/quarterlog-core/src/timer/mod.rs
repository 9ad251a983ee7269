pub mod decision;
mod machine;
pub mod scheduler;
pub mod snapshot;

pub use decision::{DecisionKind, PendingDecision};
pub use machine::{
    CycleMachine, CycleSession, DecisionOutcome, SessionState, StaleCommand, StartParams,
    MAX_CYCLE_DURATION_MS,
};
pub use scheduler::{CountdownScheduler, SchedulerEvent, TickKind, TickSink};
pub use snapshot::{Phase, SessionSnapshot};
