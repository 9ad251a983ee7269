//! Countdown scheduler.
//!
//! One tick loop per armed countdown. Each tick compares the wall clock to the
//! absolute `end_time` instead of counting elapsed ticks, so a loop that was
//! suspended for a while catches up on its next tick.
//!
//! ## Cancellation
//!
//! Every `arm` gets a new generation number. Events carry the generation they
//! were produced under, and the owner checks [`CountdownScheduler::is_current`]
//! before acting on one. A tick that was already in flight when `disarm` ran is
//! therefore recognisable as stale and dropped.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    Tick { remaining: Duration },
    /// Sent once per arm, after which the loop ends.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerEvent {
    pub generation: u64,
    pub kind: TickKind,
}

/// Where the tick loop sends its events.
///
/// Returns `false` when the receiver is gone, which ends the loop.
pub trait TickSink: Send + Sync + 'static {
    fn deliver(&self, event: SchedulerEvent) -> bool;
}

impl TickSink for tokio::sync::mpsc::UnboundedSender<SchedulerEvent> {
    fn deliver(&self, event: SchedulerEvent) -> bool {
        self.send(event).is_ok()
    }
}

struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Single-worker periodic ticker. At most one loop is live at a time.
pub struct CountdownScheduler {
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TickSink>,
    interval: std::time::Duration,
    generation: u64,
    armed: Option<Armed>,
}

impl CountdownScheduler {
    pub fn new(
        clock: Arc<dyn Clock>,
        sink: Arc<dyn TickSink>,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            clock,
            sink,
            interval,
            generation: 0,
            armed: None,
        }
    }

    /// Cancel any running loop and start a new one counting down to `end_time`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&mut self, end_time: DateTime<Utc>) -> u64 {
        self.disarm();
        self.generation += 1;
        let generation = self.generation;
        let handle = tokio::spawn(tick_loop(
            Arc::clone(&self.clock),
            Arc::clone(&self.sink),
            generation,
            end_time,
            self.interval,
        ));
        self.armed = Some(Armed { generation, handle });
        generation
    }

    /// Cancel the running loop. Returns whether anything was armed.
    pub fn disarm(&mut self) -> bool {
        match self.armed.take() {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether `generation` belongs to the loop that is armed right now.
    pub fn is_current(&self, generation: u64) -> bool {
        self.armed
            .as_ref()
            .is_some_and(|armed| armed.generation == generation)
    }

    /// Consume the expiry of `generation`.
    ///
    /// Returns `true` exactly once per arm; later calls, or calls for a
    /// superseded generation, return `false`.
    pub fn take_expiry(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.armed = None;
        true
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}

impl Drop for CountdownScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}

async fn tick_loop(
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TickSink>,
    generation: u64,
    end_time: DateTime<Utc>,
    interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let remaining = end_time - clock.now();
        if remaining > Duration::zero() {
            trace!(generation, remaining_ms = remaining.num_milliseconds(), "tick");
            if !sink.deliver(SchedulerEvent {
                generation,
                kind: TickKind::Tick { remaining },
            }) {
                return;
            }
        } else {
            trace!(generation, "countdown expired");
            sink.deliver(SchedulerEvent {
                generation,
                kind: TickKind::Expired,
            });
            return;
        }
    }
}
