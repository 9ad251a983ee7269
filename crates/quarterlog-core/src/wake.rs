//! Wake-assurance: keep the host awake through a cycle and its alert.
//!
//! A grant is held for `duration + grace` from every cycle (re)start. Grants
//! are never stacked: acquiring always releases the previous grant first, and
//! release is idempotent. If the platform resource is unavailable the session
//! carries on with best-effort timing.

use std::process::{Child, Command, Stdio};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::error::WakeError;
use crate::storage::WakeConfig;

/// Platform resource that prevents sleep while held.
pub trait WakeLock: Send {
    fn acquire(&mut self, hold: std::time::Duration) -> Result<(), WakeError>;
    fn release(&mut self);
}

/// Used when no inhibitor is configured.
#[derive(Debug, Default)]
pub struct NoopWakeLock;

impl WakeLock for NoopWakeLock {
    fn acquire(&mut self, _hold: std::time::Duration) -> Result<(), WakeError> {
        Ok(())
    }

    fn release(&mut self) {}
}

/// Holds an inhibitor child process, e.g.
/// `systemd-inhibit --what=sleep --why=quarterlog sleep {secs}`.
///
/// The child exits on its own when the grant lapses; release kills it early.
#[derive(Debug)]
pub struct CommandWakeLock {
    argv: Vec<String>,
    child: Option<Child>,
}

impl CommandWakeLock {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv, child: None }
    }

    /// Pick the lock described by `config`.
    pub fn from_config(config: &WakeConfig) -> Box<dyn WakeLock> {
        if !config.enabled || config.command.is_empty() {
            return Box::new(NoopWakeLock);
        }
        Box::new(Self::new(config.command.clone()))
    }
}

impl WakeLock for CommandWakeLock {
    fn acquire(&mut self, hold: std::time::Duration) -> Result<(), WakeError> {
        let secs = hold.as_secs() + u64::from(hold.subsec_nanos() > 0);
        let mut args = self
            .argv
            .iter()
            .map(|arg| arg.replace("{secs}", &secs.to_string()));
        let program = args
            .next()
            .ok_or_else(|| WakeError::Unavailable("empty wake command".into()))?;

        let child = Command::new(&program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| WakeError::Unavailable(format!("{program}: {e}")))?;
        self.child = Some(child);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            // Already exited when the grant lapsed on its own.
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for CommandWakeLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Scoped owner of the wake grant.
pub struct WakeAssurance {
    lock: Box<dyn WakeLock>,
    grace: Duration,
    held_until: Option<DateTime<Utc>>,
}

impl WakeAssurance {
    pub fn new(lock: Box<dyn WakeLock>, grace: Duration) -> Self {
        Self {
            lock,
            grace,
            held_until: None,
        }
    }

    /// Hold the host awake until `until + grace`, dropping any earlier grant.
    pub fn acquire_until(&mut self, now: DateTime<Utc>, until: DateTime<Utc>) {
        self.release();
        let held_until = until.checked_add_signed(self.grace).unwrap_or(until);
        let hold = (held_until - now).to_std().unwrap_or_default();
        match self.lock.acquire(hold) {
            Ok(()) => {
                debug!(until = %held_until, "wake-assurance acquired");
                self.held_until = Some(held_until);
            }
            Err(e) => {
                warn!(error = %e, "wake-assurance unavailable, continuing with best-effort timing");
            }
        }
    }

    pub fn release(&mut self) {
        if self.held_until.take().is_some() {
            self.lock.release();
            debug!("wake-assurance released");
        }
    }

    /// Drop a grant whose window has passed.
    pub fn release_if_lapsed(&mut self, now: DateTime<Utc>) {
        if self.held_until.is_some_and(|until| until <= now) {
            self.release();
        }
    }

    pub fn is_held(&self) -> bool {
        self.held_until.is_some()
    }

    pub fn held_until(&self) -> Option<DateTime<Utc>> {
        self.held_until
    }
}

impl Drop for WakeAssurance {
    fn drop(&mut self) {
        self.release();
    }
}
