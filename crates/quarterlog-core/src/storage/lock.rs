//! Cross-process ownership of the session.
//!
//! Only one session runtime may write the store at a time. The owner holds an
//! exclusive advisory lock on `session.lock` in the data directory and writes
//! its pid into it; the OS drops the lock when the process exits.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::StoreError;

pub const LOCK_FILE: &str = "session.lock";

#[derive(Debug)]
pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl SessionLock {
    /// Take ownership of the session kept under `dir`.
    ///
    /// Fails with [`StoreError::Locked`] while another process holds it.
    pub fn acquire(dir: &Path) -> Result<Self, StoreError> {
        let path = dir.join(LOCK_FILE);
        let unavailable = |e: std::io::Error| StoreError::Unavailable(format!("{}: {e}", path.display()));

        // Not truncated until held, so a contender can still read the owner.
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(unavailable)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() != ErrorKind::WouldBlock
                && e.raw_os_error() != fs2::lock_contended_error().raw_os_error()
            {
                return Err(unavailable(e));
            }
            let mut owner = String::new();
            let _ = file.read_to_string(&mut owner);
            let owner = match owner.trim() {
                "" => "unknown pid".to_string(),
                pid => format!("pid {pid}"),
            };
            return Err(StoreError::Locked {
                path: path.clone(),
                owner,
            });
        }

        file.set_len(0).map_err(unavailable)?;
        writeln!(file, "{}", std::process::id())
            .and_then(|()| file.flush())
            .map_err(unavailable)?;
        debug!(path = %path.display(), "session lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = FileExt::unlock(&self.file);
    }
}
