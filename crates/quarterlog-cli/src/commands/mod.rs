pub mod config;
pub mod daily;
pub mod run;
pub mod session;

use std::future::Future;

use quarterlog_core::storage::data_dir;
use quarterlog_core::{
    CommandWakeLock, Config, Database, RuntimeOptions, SessionHandle, SessionLock, SessionRuntime,
};

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Drive `future` to completion on a fresh single-threaded runtime.
pub fn block_on<F: Future>(future: F) -> CliResult<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}

/// Restore the persisted session and start its runtime.
///
/// Refuses while another process owns the session. `hold_wake` installs the
/// configured wake lock; one-shot commands exit right away and leave it out.
pub fn spawn_session(config: &Config, hold_wake: bool) -> CliResult<SessionHandle> {
    let lock = SessionLock::acquire(&data_dir()?)?;
    let store = Database::open_or_memory()?;
    let mut runtime = SessionRuntime::new(store)
        .with_session_lock(lock)
        .with_options(RuntimeOptions::from_config(config));
    if hold_wake {
        runtime = runtime.with_wake_lock(CommandWakeLock::from_config(&config.wake));
    }
    Ok(runtime.spawn())
}

/// Format milliseconds as `MM:SS`.
pub fn format_remaining(ms: i64) -> String {
    let secs = (ms.max(0) + 999) / 1000;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_rounds_up_to_whole_seconds() {
        assert_eq!(format_remaining(900_000), "15:00");
        assert_eq!(format_remaining(61_001), "01:02");
        assert_eq!(format_remaining(1), "00:01");
        assert_eq!(format_remaining(-5), "00:00");
    }
}
