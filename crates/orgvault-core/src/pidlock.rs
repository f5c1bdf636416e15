//! Singleton lock backed by a PID file.
//!
//! The file is created with create-exclusive semantics, so two supervisors
//! racing for the lock cannot both win. A file left behind by a dead process
//! is stale and is taken over. The recorded PID is never trusted without
//! checking that the process is still alive.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::process;

/// Errors from lock acquisition.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("lock {0} is being taken over by another process")]
    Contended(PathBuf),

    #[error("PID file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// What a PID file says about the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidStatus {
    /// No PID file.
    NotRunning,
    /// The file names a process that no longer exists, or holds garbage.
    Stale { pid: Option<u32> },
    /// The file names a live process.
    Running { pid: u32 },
}

impl PidStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, PidStatus::Running { .. })
    }
}

impl std::fmt::Display for PidStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PidStatus::NotRunning => write!(f, "not running"),
            PidStatus::Stale { pid: Some(pid) } => write!(f, "not running (stale pid {pid})"),
            PidStatus::Stale { pid: None } => write!(f, "not running (unreadable pid file)"),
            PidStatus::Running { pid } => write!(f, "running (pid {pid})"),
        }
    }
}

/// Read the PID recorded in `path`.
///
/// `Ok(None)` when the file does not exist; `Ok(Some(None))` when it exists
/// but does not hold a PID.
pub fn read_pid(path: &Path) -> Result<Option<Option<u32>>, LockError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content.trim().parse().ok())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Classify the PID file at `path`.
pub fn inspect(path: &Path) -> Result<PidStatus, LockError> {
    Ok(match read_pid(path)? {
        None => PidStatus::NotRunning,
        Some(Some(pid)) if process::is_alive(pid) => PidStatus::Running { pid },
        Some(pid) => PidStatus::Stale { pid },
    })
}

/// Remove the PID file; a missing file is fine.
pub fn remove(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// A held lock. Dropping it removes the PID file if it still names us.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    pid: u32,
}

impl PidLock {
    /// Acquire the lock for the current process.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        Self::acquire_for(path, process::current_pid())
    }

    /// Acquire the lock on behalf of `pid`.
    pub fn acquire_for(path: impl Into<PathBuf>, pid: u32) -> Result<Self, LockError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: path.clone(),
                source,
            })?;
        }

        match create_exclusive(&path, pid) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                match inspect(&path)? {
                    PidStatus::Running { pid: holder } => {
                        return Err(LockError::AlreadyRunning { pid: holder });
                    }
                    PidStatus::Stale { pid: stale } => {
                        warn!(path = %path.display(), stale_pid = ?stale, "Removing stale PID file");
                        remove(&path)?;
                    }
                    PidStatus::NotRunning => {}
                }
                // One retry: whoever creates the file first owns the lock.
                create_exclusive(&path, pid).map_err(|source| {
                    if source.kind() == io::ErrorKind::AlreadyExists {
                        LockError::Contended(path.clone())
                    } else {
                        LockError::Io {
                            path: path.clone(),
                            source,
                        }
                    }
                })?;
            }
            Err(source) => {
                return Err(LockError::Io {
                    path: path.clone(),
                    source,
                });
            }
        }

        debug!(path = %path.display(), pid, "PID lock acquired");
        Ok(Self { path, pid })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if let Ok(Some(Some(pid))) = read_pid(&self.path)
            && pid == self.pid
        {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn create_exclusive(path: &Path, pid: u32) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    writeln!(file, "{pid}")?;
    file.sync_all()
}
