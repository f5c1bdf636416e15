#![deny(unsafe_code)]

//! orgvault core runtime.
//!
//! Backs up every repository of a GitHub organization to centralized and
//! decentralized hosts. The [`supervisor`] keeps a single backup cycle
//! running on a fixed cadence; a cycle is either an external command or the
//! in-process [`orchestrator`], which fans repositories out to the
//! [`targets`].

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future: the return type for async
/// trait methods used through `dyn Trait` ([`targets::BackupTarget`],
/// [`cycle::BackupCycle`]).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Tar and tar.gz archives of mirror clones.
pub mod archive;
/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Backup-cycle runners: external command or in-process orchestrator.
pub mod cycle;
/// Dependent daemons (IPFS, Radicle node) and their readiness.
pub mod daemons;
/// `git` invocations and credential handling for clone URLs.
pub mod git;
/// GitHub organization discovery and repository filters.
pub mod github;
/// Reading back the supervisor log: tail and follow.
pub mod logfile;
/// Tracing subscriber setup.
pub mod logging;
/// Slack and webhook notifications.
pub mod notify;
/// One backup run across all repositories and targets.
pub mod orchestrator;
/// Singleton PID-file lock.
pub mod pidlock;
/// Prerequisite binaries.
pub mod preflight;
/// Process liveness and termination.
pub mod process;
/// Environment overlay and zeroizing secret values.
pub mod secrets;
/// Scheduler unit generation (cron, systemd, launchd).
pub mod setup;
/// Aggregated results of a backup run.
pub mod summary;
/// The supervisor loop, `stop` and `status`.
pub mod supervisor;
/// Backup targets.
pub mod targets;

pub use cycle::{BackupCycle, CommandCycle, OrchestratorCycle};
pub use daemons::DependentDaemon;
pub use github::{GitHubClient, RepoFilter, Repository};
pub use notify::Notifier;
pub use orchestrator::Orchestrator;
pub use pidlock::{PidLock, PidStatus};
pub use secrets::{Environment, SecretValue};
pub use summary::RunSummary;
pub use supervisor::{ShutdownHandle, Supervisor};
pub use targets::BackupTarget;
