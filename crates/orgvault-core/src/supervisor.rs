//! Backup-cycle supervisor: singleton process, dependent daemons, and the
//! fixed-interval loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use orgvault_config::AppConfig;

use crate::cycle::BackupCycle;
use crate::daemons::{DependentDaemon, Readiness};
use crate::pidlock::{self, LockError, PidLock};
use crate::process::{self, ProcessError};
use crate::secrets::Environment;

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// Requests a graceful stop of a running [`Supervisor`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<ShutdownSignal>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(ShutdownSignal);
    }
}

/// Errors from the supervisor runtime.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("not running (no PID file at {0})")]
    NotRunning(PathBuf),

    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// The supervisor loop.
pub struct Supervisor {
    cycle: Arc<dyn BackupCycle>,
    pid_file: PathBuf,
    interval: Duration,
    daemons: Vec<DependentDaemon>,
    readiness_timeout: Duration,
    probe_interval: Duration,
    env: Environment,
    client: reqwest::Client,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl Supervisor {
    pub fn new(pid_file: impl Into<PathBuf>, cycle: Arc<dyn BackupCycle>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            cycle,
            pid_file: pid_file.into(),
            interval: Duration::from_secs(21600),
            daemons: Vec::new(),
            readiness_timeout: Duration::from_secs(30),
            probe_interval: Duration::from_millis(500),
            env: Environment::new(),
            client: reqwest::Client::new(),
            shutdown_tx,
        }
    }

    /// A supervisor configured from the `supervisor` section, with the
    /// daemons implied by the enabled targets.
    pub fn from_config(config: &AppConfig, env: Environment, cycle: Arc<dyn BackupCycle>) -> Self {
        let sup = &config.supervisor;
        Self::new(sup.pid_file.clone(), cycle)
            .with_interval(Duration::from_secs(sup.interval_secs))
            .with_daemons(
                DependentDaemon::for_config(config),
                Duration::from_secs(sup.readiness_timeout_secs),
                Duration::from_millis(sup.probe_interval_ms),
            )
            .with_env(env)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_daemons(
        mut self,
        daemons: Vec<DependentDaemon>,
        readiness_timeout: Duration,
        probe_interval: Duration,
    ) -> Self {
        self.daemons = daemons;
        self.readiness_timeout = readiness_timeout;
        self.probe_interval = probe_interval;
        self
    }

    pub fn with_env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Take the lock and run cycles until shutdown. Returns the number of
    /// cycles run. The PID file is removed on return.
    pub async fn run(&self) -> Result<u64, SupervisorError> {
        let lock = PidLock::acquire(&self.pid_file)?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut sigterm = listen(SignalKind::terminate())?;
        let mut sigint = listen(SignalKind::interrupt())?;

        info!(
            pid = lock.pid(),
            pid_file = %self.pid_file.display(),
            interval_secs = self.interval.as_secs(),
            cycle = self.cycle.name(),
            "Supervisor started"
        );
        self.ensure_daemons().await;

        let mut cycles = 0u64;
        loop {
            cycles += 1;
            info!(cycle = cycles, "Backup cycle starting");
            match self.cycle.run().await {
                Ok(outcome) => {
                    info!(cycle = cycles, detail = %outcome.detail, "Backup cycle completed")
                }
                Err(e) => error!(cycle = cycles, error = %e, "Backup cycle failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested, stopping supervisor");
                    break;
                }
                _ = sigint.recv() => {
                    warn!("SIGINT received, stopping supervisor");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received, stopping supervisor");
                    break;
                }
            }
        }

        drop(lock);
        info!(cycles, "Supervisor stopped");
        Ok(cycles)
    }

    async fn ensure_daemons(&self) {
        for daemon in &self.daemons {
            match daemon
                .ensure_running(
                    &self.client,
                    &self.env,
                    self.readiness_timeout,
                    self.probe_interval,
                )
                .await
            {
                Ok(Readiness::AlreadyRunning) => {
                    info!(daemon = %daemon.name, "Daemon already running")
                }
                Ok(Readiness::Started { pid }) => {
                    info!(daemon = %daemon.name, pid = ?pid, "Daemon started")
                }
                Err(e) => error!(daemon = %daemon.name, error = %e, "Daemon not available"),
            }
        }
    }
}

/// Installed once per run so a signal delivered mid-cycle is still seen by
/// the following sleep.
fn listen(kind: SignalKind) -> Result<Signal, SupervisorError> {
    signal(kind).map_err(SupervisorError::Signal)
}

/// What `stop` found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The supervisor exited after SIGTERM.
    Stopped { pid: u32 },
    /// SIGTERM was sent but the process outlived the grace period.
    StillRunning { pid: u32 },
    /// The recorded process was already gone.
    Stale { pid: Option<u32> },
}

/// Stop the supervisor recorded in `pid_file`. The PID file is removed in
/// every case except when there is none.
pub async fn stop(pid_file: &Path, grace: Duration) -> Result<StopOutcome, SupervisorError> {
    let recorded = pidlock::read_pid(pid_file)?
        .ok_or_else(|| SupervisorError::NotRunning(pid_file.to_path_buf()))?;

    let outcome = match recorded {
        Some(pid) if process::is_alive(pid) => {
            info!(pid, "Sending SIGTERM to supervisor");
            if let Err(e) = process::terminate(pid) {
                pidlock::remove(pid_file)?;
                return Err(e.into());
            }
            if process::wait_for_exit(pid, grace).await {
                StopOutcome::Stopped { pid }
            } else {
                warn!(pid, ?grace, "Supervisor still running after grace period");
                StopOutcome::StillRunning { pid }
            }
        }
        pid => StopOutcome::Stale { pid },
    };

    pidlock::remove(pid_file)?;
    Ok(outcome)
}

/// Liveness according to the PID file.
pub fn status(pid_file: &Path) -> Result<pidlock::PidStatus, SupervisorError> {
    Ok(pidlock::inspect(pid_file)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoxFuture;
    use crate::cycle::{CycleError, CycleOutcome};
    use crate::daemons::Probe;
    use crate::pidlock::PidStatus;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    /// Fails every cycle and counts the attempts.
    #[derive(Default)]
    struct FailingCycle {
        runs: AtomicU64,
    }

    impl BackupCycle for FailingCycle {
        fn name(&self) -> &str {
            "failing"
        }

        fn run(&self) -> BoxFuture<'_, Result<CycleOutcome, CycleError>> {
            Box::pin(async move {
                self.runs.fetch_add(1, Ordering::SeqCst);
                Err(CycleError::BackupsFailed {
                    failed: 1,
                    total: 1,
                })
            })
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_loop_survives_failures_and_stops_on_shutdown() {
        let tmp = TempDir::new().unwrap();
        let pid_file = tmp.path().join("run/orgvault.pid");
        let cycle = Arc::new(FailingCycle::default());
        let supervisor = Arc::new(
            Supervisor::new(&pid_file, cycle.clone()).with_interval(Duration::from_millis(20)),
        );
        let handle = supervisor.shutdown_handle();

        let task = tokio::spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.run().await }
        });

        wait_until(|| cycle.runs.load(Ordering::SeqCst) >= 3).await;
        assert_eq!(
            status(&pid_file).unwrap(),
            PidStatus::Running {
                pid: process::current_pid()
            }
        );

        handle.shutdown();
        let cycles = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(cycles >= 3);
        assert!(!pid_file.exists());
    }

    #[tokio::test]
    async fn test_second_instance_refused() {
        let tmp = TempDir::new().unwrap();
        let pid_file = tmp.path().join("orgvault.pid");
        let _held = PidLock::acquire(&pid_file).unwrap();

        let supervisor = Supervisor::new(&pid_file, Arc::new(FailingCycle::default()));
        let err = supervisor.run().await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Lock(LockError::AlreadyRunning { .. })
        ));
    }

    #[tokio::test]
    async fn test_unready_daemon_does_not_block_loop() {
        let tmp = TempDir::new().unwrap();
        let pid_file = tmp.path().join("orgvault.pid");
        let cycle = Arc::new(FailingCycle::default());
        let daemon = DependentDaemon::new(
            "flaky",
            Probe::Command {
                argv: vec!["false".to_string()],
            },
            vec!["false".to_string()],
        );
        let supervisor = Arc::new(
            Supervisor::new(&pid_file, cycle.clone())
                .with_interval(Duration::from_secs(3600))
                .with_daemons(
                    vec![daemon],
                    Duration::from_millis(500),
                    Duration::from_millis(20),
                ),
        );
        let handle = supervisor.shutdown_handle();
        let task = tokio::spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.run().await }
        });

        wait_until(|| cycle.runs.load(Ordering::SeqCst) >= 1).await;
        handle.shutdown();
        assert_eq!(task.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stop_without_pid_file() {
        let tmp = TempDir::new().unwrap();
        let err = stop(&tmp.path().join("missing.pid"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::NotRunning(_)));
    }

    #[tokio::test]
    async fn test_stop_removes_stale_pid_file() {
        let tmp = TempDir::new().unwrap();
        let pid_file = tmp.path().join("orgvault.pid");
        std::fs::write(&pid_file, "999999999\n").unwrap();

        let outcome = stop(&pid_file, Duration::from_millis(100)).await.unwrap();
        assert_eq!(outcome, StopOutcome::Stale { pid: Some(999999999) });
        assert!(!pid_file.exists());
        assert_eq!(status(&pid_file).unwrap(), PidStatus::NotRunning);
    }
}
