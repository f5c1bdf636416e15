//! Dependent daemons (IPFS, Radicle node) the backup cycle relies on.
//!
//! A daemon is probed first; only when the probe fails is its start command
//! spawned, detached, after which readiness is awaited with a bounded
//! timeout. Every outcome is explicit: already running, started, exited
//! before becoming ready, or timed out.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use reqwest::Method;
use tracing::{debug, info, warn};

use orgvault_config::{AppConfig, DaemonConfig};

use crate::secrets::Environment;

/// How to tell whether a daemon is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Reachable when the endpoint answers with a success status.
    Http { url: String, method: Method },
    /// Reachable when the command exits 0.
    Command { argv: Vec<String> },
}

/// Successful readiness outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    AlreadyRunning,
    Started { pid: Option<u32> },
}

/// Readiness failures.
#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("{name}: start command is empty")]
    EmptyCommand { name: String },

    #[error("{name}: failed to spawn start command: {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },

    #[error("{name}: failed to poll daemon process: {source}")]
    Wait {
        name: String,
        source: std::io::Error,
    },

    #[error("{name}: daemon exited before becoming ready ({status})")]
    Exited { name: String, status: ExitStatus },

    #[error("{name}: not ready after {timeout:?}")]
    Timeout { name: String, timeout: Duration },
}

/// A daemon kept reachable by the supervisor.
#[derive(Debug, Clone)]
pub struct DependentDaemon {
    pub name: String,
    pub probe: Probe,
    pub start: Vec<String>,
    /// Extra variables for the probe and start commands.
    pub envs: Vec<(String, String)>,
}

impl DependentDaemon {
    pub fn new(name: impl Into<String>, probe: Probe, start: Vec<String>) -> Self {
        Self {
            name: name.into(),
            probe,
            start,
            envs: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Build from an explicit `supervisor.daemons` entry.
    pub fn from_config(config: &DaemonConfig) -> Self {
        let probe = match (&config.probe_url, &config.probe_command) {
            (Some(url), _) => Probe::Http {
                url: url.clone(),
                method: config.probe_method.parse().unwrap_or(Method::GET),
            },
            (None, Some(argv)) => Probe::Command { argv: argv.clone() },
            (None, None) => Probe::Command { argv: Vec::new() },
        };
        Self::new(config.name.clone(), probe, config.start_command.clone())
    }

    /// The IPFS daemon behind the configured HTTP API.
    pub fn ipfs(api_url: &str) -> Self {
        Self::new(
            "ipfs",
            Probe::Http {
                url: format!("{}/api/v0/version", api_url.trim_end_matches('/')),
                method: Method::POST,
            },
            vec!["ipfs".to_string(), "daemon".to_string()],
        )
    }

    /// The local Radicle node.
    pub fn radicle() -> Self {
        Self::new(
            "radicle",
            Probe::Command {
                argv: vec!["rad".to_string(), "node".to_string(), "status".to_string()],
            },
            vec!["rad".to_string(), "node".to_string(), "start".to_string()],
        )
    }

    /// Daemons implied by the enabled targets, followed by explicit ones.
    /// An explicit entry replaces an implied daemon of the same name.
    pub fn for_config(config: &AppConfig) -> Vec<Self> {
        let mut daemons = Vec::new();
        let targets = &config.backup_targets;
        if targets.ipfs.enabled {
            daemons.push(Self::ipfs(&targets.ipfs.api_url));
        }
        if targets.radicle.enabled {
            let mut rad = Self::radicle();
            if let Some(home) = &targets.radicle.rad_home {
                rad = rad.with_env("RAD_HOME", home.display().to_string());
            }
            daemons.push(rad);
        }
        for explicit in &config.supervisor.daemons {
            daemons.retain(|d| d.name != explicit.name);
            daemons.push(Self::from_config(explicit));
        }
        daemons
    }

    /// Probe once.
    pub async fn probe(&self, client: &reqwest::Client, env: &Environment) -> bool {
        match &self.probe {
            Probe::Http { url, method } => {
                match client
                    .request(method.clone(), url)
                    .timeout(Duration::from_secs(2))
                    .send()
                    .await
                {
                    Ok(resp) => resp.status().is_success(),
                    Err(e) => {
                        debug!(daemon = %self.name, error = %e, "HTTP probe failed");
                        false
                    }
                }
            }
            Probe::Command { argv } => {
                let Some((program, args)) = argv.split_first() else {
                    return false;
                };
                let mut cmd = tokio::process::Command::new(program);
                cmd.args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());
                self.apply_env(&mut cmd, env);
                match cmd.status().await {
                    Ok(status) => status.success(),
                    Err(e) => {
                        debug!(daemon = %self.name, error = %e, "Probe command failed to run");
                        false
                    }
                }
            }
        }
    }

    /// Make sure the daemon is reachable, starting it when it is not.
    pub async fn ensure_running(
        &self,
        client: &reqwest::Client,
        env: &Environment,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Readiness, ReadinessError> {
        if self.probe(client, env).await {
            debug!(daemon = %self.name, "Daemon already reachable");
            return Ok(Readiness::AlreadyRunning);
        }

        let Some((program, args)) = self.start.split_first() else {
            return Err(ReadinessError::EmptyCommand {
                name: self.name.clone(),
            });
        };

        info!(daemon = %self.name, command = ?self.start, "Starting daemon");
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);
        self.apply_env(&mut cmd, env);

        let mut child = cmd.spawn().map_err(|source| ReadinessError::Spawn {
            name: self.name.clone(),
            source,
        })?;
        let pid = child.id();

        let ready = async {
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        return Err(ReadinessError::Exited {
                            name: self.name.clone(),
                            status,
                        });
                    }
                    Ok(None) => {}
                    Err(source) => {
                        return Err(ReadinessError::Wait {
                            name: self.name.clone(),
                            source,
                        });
                    }
                }
                if self.probe(client, env).await {
                    return Ok(());
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, ready).await {
            Ok(Ok(())) => {
                info!(daemon = %self.name, pid = ?pid, "Daemon ready");
                Ok(Readiness::Started { pid })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(daemon = %self.name, ?timeout, "Daemon did not become ready");
                Err(ReadinessError::Timeout {
                    name: self.name.clone(),
                    timeout,
                })
            }
        }
    }

    fn apply_env(&self, cmd: &mut tokio::process::Command, env: &Environment) {
        env.apply_to(cmd);
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process;
    use tempfile::TempDir;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn command_probe(script: &str) -> Probe {
        Probe::Command { argv: sh(script) }
    }

    #[tokio::test]
    async fn test_already_running_skips_start() {
        let tmp = TempDir::new().unwrap();
        let marker = tmp.path().join("started");
        let daemon = DependentDaemon::new(
            "up",
            command_probe("true"),
            sh(&format!("touch {}", marker.display())),
        );

        let result = daemon
            .ensure_running(
                &reqwest::Client::new(),
                &Environment::isolated(),
                Duration::from_secs(2),
                Duration::from_millis(20),
            )
            .await
            .unwrap();

        assert_eq!(result, Readiness::AlreadyRunning);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_started_once_probe_succeeds() {
        let tmp = TempDir::new().unwrap();
        let marker = tmp.path().join("ready");
        let daemon = DependentDaemon::new(
            "slow",
            command_probe(&format!("test -f {}", marker.display())),
            sh(&format!(
                "sleep 0.2; touch {}; exec sleep 30",
                marker.display()
            )),
        );

        let result = daemon
            .ensure_running(
                &reqwest::Client::new(),
                &Environment::isolated(),
                Duration::from_secs(5),
                Duration::from_millis(20),
            )
            .await
            .unwrap();

        let Readiness::Started { pid: Some(pid) } = result else {
            panic!("expected Started, got {result:?}");
        };
        process::terminate(pid).unwrap();
    }

    #[tokio::test]
    async fn test_exit_before_ready_is_reported() {
        let daemon = DependentDaemon::new("crashy", command_probe("false"), sh("exit 3"));

        let err = daemon
            .ensure_running(
                &reqwest::Client::new(),
                &Environment::isolated(),
                Duration::from_secs(5),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();

        match err {
            ReadinessError::Exited { name, status } => {
                assert_eq!(name, "crashy");
                assert_eq!(status.code(), Some(3));
            }
            other => panic!("expected Exited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let daemon = DependentDaemon::new("stuck", command_probe("false"), sh("exec sleep 2"));

        let err = daemon
            .ensure_running(
                &reqwest::Client::new(),
                &Environment::isolated(),
                Duration::from_millis(200),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ReadinessError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let daemon = DependentDaemon::new(
            "missing",
            command_probe("false"),
            vec!["/nonexistent/orgvault-daemon".to_string()],
        );
        let err = daemon
            .ensure_running(
                &reqwest::Client::new(),
                &Environment::isolated(),
                Duration::from_millis(200),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReadinessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_probe_sees_environment_overlay() {
        let env = Environment::isolated().with_var("ORGVAULT_PROBE", "yes");
        let daemon = DependentDaemon::new(
            "env",
            command_probe("test \"$ORGVAULT_PROBE\" = yes"),
            sh("true"),
        );
        assert!(daemon.probe(&reqwest::Client::new(), &env).await);
    }

    #[test]
    fn test_daemons_derived_from_targets() {
        let config = AppConfig::parse(
            r#"
backup_targets:
  ipfs:
    enabled: true
    api_url: http://127.0.0.1:5001/
  radicle:
    enabled: true
    rad_home: /srv/rad
"#,
        )
        .unwrap();

        let daemons = DependentDaemon::for_config(&config);
        assert_eq!(daemons.len(), 2);
        assert_eq!(
            daemons[0].probe,
            Probe::Http {
                url: "http://127.0.0.1:5001/api/v0/version".to_string(),
                method: Method::POST,
            }
        );
        assert_eq!(daemons[0].start, vec!["ipfs", "daemon"]);
        assert_eq!(daemons[1].name, "radicle");
        assert_eq!(
            daemons[1].envs,
            vec![("RAD_HOME".to_string(), "/srv/rad".to_string())]
        );
    }

    #[test]
    fn test_explicit_daemon_replaces_implied() {
        let config = AppConfig::parse(
            r#"
backup_targets:
  ipfs:
    enabled: true
supervisor:
  daemons:
    - name: ipfs
      probe_command: [ipfs, id]
      start_command: [ipfs, daemon, --migrate]
"#,
        )
        .unwrap();

        let daemons = DependentDaemon::for_config(&config);
        assert_eq!(daemons.len(), 1);
        assert_eq!(
            daemons[0].probe,
            Probe::Command {
                argv: vec!["ipfs".to_string(), "id".to_string()]
            }
        );
        assert_eq!(daemons[0].start.len(), 3);
    }

    #[test]
    fn test_no_daemons_without_decentralized_targets() {
        assert!(DependentDaemon::for_config(&AppConfig::default()).is_empty());
    }
}
