//! Backup-cycle runners invoked by the supervisor loop.
//!
//! A cycle either succeeds or fails; the supervisor only logs the outcome
//! and tries again after its interval.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{info, warn};

use crate::BoxFuture;
use crate::github::GitHubError;
use crate::orchestrator::Orchestrator;
use crate::secrets::Environment;

/// Stderr lines kept as failure detail.
const STDERR_TAIL: usize = 5;

/// Summary of a successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    pub detail: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("backup command is empty")]
    EmptyCommand,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("failed to wait for backup command: {0}")]
    Wait(#[source] std::io::Error),

    #[error("backup command exited with {status}: {stderr}")]
    Exited { status: ExitStatus, stderr: String },

    #[error("repository discovery failed: {0}")]
    Discovery(#[from] GitHubError),

    #[error("{failed} of {total} backups failed")]
    BackupsFailed { failed: usize, total: usize },
}

/// One backup cycle.
pub trait BackupCycle: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self) -> BoxFuture<'_, Result<CycleOutcome, CycleError>>;
}

/// Runs an external backup command.
pub struct CommandCycle {
    argv: Vec<String>,
    env: Environment,
    current_dir: Option<PathBuf>,
}

impl CommandCycle {
    pub fn new(argv: Vec<String>, env: Environment) -> Self {
        Self {
            argv,
            env,
            current_dir: None,
        }
    }

    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    async fn execute(&self) -> Result<CycleOutcome, CycleError> {
        let (program, args) = self.argv.split_first().ok_or(CycleError::EmptyCommand)?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        self.env.apply_to(&mut cmd);

        info!(command = ?self.argv, "Running backup command");
        let mut child = cmd.spawn().map_err(|source| CycleError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (_, tail, status) = tokio::join!(
            forward(stdout, false),
            forward(stderr, true),
            child.wait()
        );
        let status = status.map_err(CycleError::Wait)?;

        if status.success() {
            Ok(CycleOutcome {
                detail: format!("{program} exited successfully"),
            })
        } else {
            Err(CycleError::Exited {
                status,
                stderr: tail.into_iter().collect::<Vec<_>>().join("\n"),
            })
        }
    }
}

/// Log every line of a child stream; returns the last stderr lines.
async fn forward<R: AsyncRead + Unpin>(stream: Option<R>, is_stderr: bool) -> VecDeque<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    let Some(stream) = stream else {
        return tail;
    };
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            warn!(stream = "stderr", "{line}");
            if tail.len() == STDERR_TAIL {
                tail.pop_front();
            }
            tail.push_back(line);
        } else {
            info!(stream = "stdout", "{line}");
        }
    }
    tail
}

impl BackupCycle for CommandCycle {
    fn name(&self) -> &str {
        "command"
    }

    fn run(&self) -> BoxFuture<'_, Result<CycleOutcome, CycleError>> {
        Box::pin(self.execute())
    }
}

/// Runs the in-process orchestrator.
pub struct OrchestratorCycle {
    orchestrator: Orchestrator,
}

impl OrchestratorCycle {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

impl BackupCycle for OrchestratorCycle {
    fn name(&self) -> &str {
        "orchestrator"
    }

    fn run(&self) -> BoxFuture<'_, Result<CycleOutcome, CycleError>> {
        Box::pin(async move {
            let summary = self.orchestrator.run(false).await?;
            if summary.is_success() {
                Ok(CycleOutcome {
                    detail: format!(
                        "{} backups of {} repositories succeeded",
                        summary.succeeded(),
                        summary.repositories
                    ),
                })
            } else {
                Err(CycleError::BackupsFailed {
                    failed: summary.failed(),
                    total: summary.total(),
                })
            }
        })
    }
}
