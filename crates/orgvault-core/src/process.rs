//! Process liveness and termination by PID.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Errors from signalling a process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("invalid pid {0}")]
    InvalidPid(u32),

    #[error("failed to signal pid {pid}: {source}")]
    Signal { pid: u32, source: Errno },
}

fn to_pid(pid: u32) -> Result<Pid, ProcessError> {
    // 0 and values beyond i32::MAX would address process groups.
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(Pid::from_raw(raw)),
        _ => Err(ProcessError::InvalidPid(pid)),
    }
}

/// Whether a process with this PID exists.
///
/// A process owned by another user (`EPERM`) counts as alive.
pub fn is_alive(pid: u32) -> bool {
    let Ok(target) = to_pid(pid) else {
        return false;
    };
    match signal::kill(target, None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Send SIGTERM to `pid`. A process that is already gone is not an error.
pub fn terminate(pid: u32) -> Result<(), ProcessError> {
    let target = to_pid(pid)?;
    match signal::kill(target, Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(source) => Err(ProcessError::Signal { pid, source }),
    }
}

/// The PID of the calling process.
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Poll until `pid` has exited or `timeout` elapses. Returns whether the
/// process is gone.
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let poll = Duration::from_millis(50);
    let deadline = tokio::time::Instant::now().checked_add(timeout);
    loop {
        if !is_alive(pid) {
            return true;
        }
        if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_alive(current_pid()));
    }

    #[test]
    fn test_invalid_pids_are_not_alive() {
        assert!(!is_alive(0));
        assert!(!is_alive(u32::MAX));
        assert!(matches!(terminate(0), Err(ProcessError::InvalidPid(0))));
    }

    #[tokio::test]
    async fn test_terminate_child() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        assert!(is_alive(pid));

        terminate(pid).unwrap();
        let status = child.wait().await.unwrap();
        assert!(!status.success());
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn test_wait_for_exit_times_out_on_live_process() {
        assert!(!wait_for_exit(current_pid(), Duration::from_millis(120)).await);
    }

    #[tokio::test]
    async fn test_wait_for_exit_accepts_unbounded_timeout() {
        let mut child = tokio::process::Command::new("true").spawn().unwrap();
        let pid = child.id().unwrap();
        child.wait().await.unwrap();
        assert!(wait_for_exit(pid, Duration::MAX).await);
    }
}
