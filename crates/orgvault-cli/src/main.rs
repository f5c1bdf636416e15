#![deny(unsafe_code)]

//! orgvault CLI: supervisor control, one-shot backups, and scheduler setup.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use orgvault_config::AppConfig;
use orgvault_core::cycle::{BackupCycle, CommandCycle, OrchestratorCycle};
use orgvault_core::pidlock::{self, PidStatus};
use orgvault_core::setup::{self, SchedulerKind, UnitContext};
use orgvault_core::supervisor::{self, StopOutcome, SupervisorError};
use orgvault_core::{
    Environment, Orchestrator, Supervisor, build_info, logfile, logging, preflight,
};

/// How long a detached `start` waits for the supervisor to record its PID.
const DETACH_TIMEOUT: Duration = Duration::from_secs(5);

/// orgvault: back up a GitHub organization to centralized and
/// decentralized hosts.
#[derive(Parser)]
#[command(name = "orgvault", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Environment file with tokens and secrets.
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the backup supervisor.
    Start {
        /// Run the loop in this process instead of detaching.
        #[arg(long)]
        foreground: bool,
    },

    /// Stop a running supervisor.
    Stop,

    /// Stop then start the supervisor.
    Restart,

    /// Show supervisor liveness and recent log lines.
    Status {
        /// Number of log lines to show.
        #[arg(short = 'n', long, default_value_t = 10)]
        lines: usize,
    },

    /// Follow the supervisor log.
    Logs {
        /// Number of existing lines to show first.
        #[arg(short = 'n', long, default_value_t = 10)]
        lines: usize,
    },

    /// Check prerequisites and generate scheduler units.
    Setup {
        /// cron, systemd or launchd (detected when omitted).
        #[arg(long)]
        scheduler: Option<SchedulerKind>,

        /// Directory to write the units into.
        #[arg(long, default_value = "scheduler")]
        output: PathBuf,
    },

    /// Run one backup cycle in the foreground.
    Run {
        /// Discover and plan without touching any target.
        #[arg(long)]
        dry_run: bool,

        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List repositories selected for backup.
    ListRepos,

    /// Test connections to GitHub and every enabled target.
    Check,

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

impl Commands {
    /// Commands that only need the PID and log paths run without a config
    /// file, falling back to the defaults.
    fn requires_config(&self) -> bool {
        !matches!(
            self,
            Commands::Stop | Commands::Status { .. } | Commands::Logs { .. }
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut env = Environment::new();
    env.load_env_file(&cli.env_file)
        .with_context(|| format!("failed to load {}", cli.env_file.display()))?;

    let config = if cli.command.requires_config() {
        load_config(&cli.config).await?
    } else {
        load_config_or_default(&cli.config).await?
    };

    let log_file = match cli.command {
        Commands::Start { foreground: true } => Some(config.supervisor.log_file.as_path()),
        _ => None,
    };
    logging::init(
        &logging::filter_directive(cli.verbose, &config.logging.level),
        log_file,
    )
    .context("failed to initialize logging")?;

    match &cli.command {
        Commands::Start { foreground: true } => {
            cmd_run_supervisor(&cli.config, &config, env).await?
        }
        Commands::Start { foreground: false } => cmd_start(&cli, &config, &env).await?,
        Commands::Stop => cmd_stop(&config).await?,
        Commands::Restart => cmd_restart(&cli, &config, &env).await?,
        Commands::Status { lines } => cmd_status(&config, *lines)?,
        Commands::Logs { lines } => cmd_logs(&config, *lines).await?,
        Commands::Setup { scheduler, output } => cmd_setup(&cli, &config, *scheduler, output)?,
        Commands::Run { dry_run, json } => {
            cmd_run(&cli.config, &config, env, *dry_run, *json).await?
        }
        Commands::ListRepos => cmd_list_repos(&config, &env).await?,
        Commands::Check => cmd_check(&config, &env).await?,
        Commands::Config { show } => cmd_config(&cli.config, &config, *show)?,
    }

    Ok(())
}

/// The configured backup cycle: the external command when one is set,
/// otherwise the in-process orchestrator.
///
/// The external command runs from the directory holding the config file.
fn build_cycle(
    config_path: &Path,
    config: &AppConfig,
    env: &Environment,
) -> Result<Arc<dyn BackupCycle>> {
    if let Some(argv) = &config.supervisor.backup_command {
        return Ok(Arc::new(command_cycle(config_path, argv, env.clone())));
    }
    let orchestrator = Orchestrator::from_config(config, env)?;
    Ok(Arc::new(OrchestratorCycle::new(orchestrator)))
}

fn command_cycle(config_path: &Path, argv: &[String], env: Environment) -> CommandCycle {
    let cycle = CommandCycle::new(argv.to_vec(), env);
    match config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => cycle.with_current_dir(dir),
        None => cycle,
    }
}

fn ensure_prerequisites(config: &AppConfig) -> Result<()> {
    let missing = preflight::missing_binaries(config);
    if !missing.is_empty() {
        bail!("missing required binaries on PATH: {}", missing.join(", "));
    }
    Ok(())
}

async fn cmd_run_supervisor(config_path: &Path, config: &AppConfig, env: Environment) -> Result<()> {
    ensure_prerequisites(config)?;
    let cycle = build_cycle(config_path, config, &env)?;
    info!(
        version = %build_info::version_string(),
        cycle = cycle.name(),
        "Starting orgvault supervisor"
    );

    let supervisor = Supervisor::from_config(config, env, cycle);
    let cycles = supervisor.run().await?;
    info!(cycles, "orgvault supervisor exited");
    Ok(())
}

async fn cmd_start(cli: &Cli, config: &AppConfig, env: &Environment) -> Result<()> {
    let pid_file = &config.supervisor.pid_file;
    if let PidStatus::Running { pid } = supervisor::status(pid_file)? {
        bail!("orgvault is already running (pid {pid})");
    }
    ensure_prerequisites(config)?;
    // Fail here, not in the detached child, on an unusable configuration.
    build_cycle(&cli.config, config, env)?;

    let exe = std::env::current_exe().context("cannot locate the orgvault executable")?;
    let mut command = tokio::process::Command::new(exe);
    command
        .arg("--config")
        .arg(&cli.config)
        .arg("--env-file")
        .arg(&cli.env_file);
    for _ in 0..cli.verbose {
        command.arg("-v");
    }
    command
        .args(["start", "--foreground"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0);

    let mut child = command.spawn().context("failed to spawn the supervisor")?;
    let child_pid = child.id().unwrap_or_default();
    debug!(pid = child_pid, "Spawned detached supervisor");

    let deadline = tokio::time::Instant::now() + DETACH_TIMEOUT;
    loop {
        if let Some(status) = child.try_wait()? {
            bail!(
                "supervisor exited during startup ({status}); see {}",
                config.supervisor.log_file.display()
            );
        }
        if let PidStatus::Running { pid } = pidlock::inspect(pid_file)?
            && pid == child_pid
        {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(pid = child_pid, "Supervisor has not written its PID file yet");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!("orgvault started (pid {child_pid})");
    println!("Logs: {}", config.supervisor.log_file.display());
    Ok(())
}

async fn cmd_stop(config: &AppConfig) -> Result<()> {
    let grace = Duration::from_secs(config.supervisor.stop_timeout_secs);
    let outcome = supervisor::stop(&config.supervisor.pid_file, grace).await?;
    report_stop(outcome);
    Ok(())
}

fn report_stop(outcome: StopOutcome) {
    match outcome {
        StopOutcome::Stopped { pid } => println!("orgvault stopped (pid {pid})"),
        StopOutcome::StillRunning { pid } => {
            println!("Sent SIGTERM to pid {pid}; it is still shutting down")
        }
        StopOutcome::Stale { pid: Some(pid) } => {
            println!("orgvault was not running (removed stale pid {pid})")
        }
        StopOutcome::Stale { pid: None } => {
            println!("orgvault was not running (removed unreadable PID file)")
        }
    }
}

async fn cmd_restart(cli: &Cli, config: &AppConfig, env: &Environment) -> Result<()> {
    let grace = Duration::from_secs(config.supervisor.stop_timeout_secs);
    match supervisor::stop(&config.supervisor.pid_file, grace).await {
        Ok(outcome) => report_stop(outcome),
        Err(SupervisorError::NotRunning(_)) => println!("orgvault was not running"),
        Err(e) => return Err(e.into()),
    }
    cmd_start(cli, config, env).await
}

fn cmd_status(config: &AppConfig, lines: usize) -> Result<()> {
    let sup = &config.supervisor;
    println!("orgvault {}", build_info::version_string());
    println!("Supervisor: {}", supervisor::status(&sup.pid_file)?);
    println!("PID file:   {}", sup.pid_file.display());

    if lines == 0 {
        return Ok(());
    }
    println!();
    match logfile::tail(&sup.log_file, lines) {
        Ok(recent) => {
            println!("Recent log lines ({}):", sup.log_file.display());
            for line in recent {
                println!("{line}");
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("No log file at {}", sup.log_file.display())
        }
        Err(e) => return Err(e).context("failed to read the log file"),
    }
    Ok(())
}

async fn cmd_logs(config: &AppConfig, lines: usize) -> Result<()> {
    let path = &config.supervisor.log_file;
    if !path.exists() {
        bail!("no log file at {}", path.display());
    }
    let mut stdout = tokio::io::stdout();
    logfile::follow(path, lines, &mut stdout, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .with_context(|| format!("failed to follow {}", path.display()))
}

fn cmd_setup(
    cli: &Cli,
    config: &AppConfig,
    scheduler: Option<SchedulerKind>,
    output: &Path,
) -> Result<()> {
    ensure_prerequisites(config)?;
    println!("All required binaries found");

    let working_dir = std::env::current_dir()?;
    let log_file = std::path::absolute(&config.supervisor.log_file)?;
    if let Some(dir) = log_file.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let local = &config.backup_targets.local_backup;
    if local.enabled {
        std::fs::create_dir_all(&local.path)
            .with_context(|| format!("failed to create {}", local.path.display()))?;
    }

    let kind = scheduler.unwrap_or_else(SchedulerKind::detect);
    let ctx = UnitContext {
        exe: std::env::current_exe().context("cannot locate the orgvault executable")?,
        config: std::path::absolute(&cli.config)?,
        working_dir,
        log_file,
        interval: Duration::from_secs(config.supervisor.interval_secs),
    };
    let units = setup::render(kind, &ctx);
    let paths = setup::write_units(&units, output)?;

    println!("Generated {kind} units:");
    for path in &paths {
        println!("  {}", path.display());
    }
    println!();
    println!("{}", setup::install_instructions(kind, &paths));
    Ok(())
}

async fn cmd_run(
    config_path: &Path,
    config: &AppConfig,
    env: Environment,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    ensure_prerequisites(config)?;

    if let Some(argv) = &config.supervisor.backup_command {
        if dry_run {
            bail!("--dry-run needs the built-in orchestrator (supervisor.backup_command is set)");
        }
        let outcome = command_cycle(config_path, argv, env).run().await?;
        println!("{}", outcome.detail);
        return Ok(());
    }

    let orchestrator = Orchestrator::from_config(config, &env)?;
    let summary = orchestrator.run(dry_run).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary.to_json())?);
    } else {
        println!("{}", summary.render());
    }
    if !summary.is_success() {
        bail!("{} of {} backups failed", summary.failed(), summary.total());
    }
    Ok(())
}

async fn cmd_list_repos(config: &AppConfig, env: &Environment) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config, env)?;
    let repos = orchestrator.discover().await?;

    println!("Repositories in {}:", orchestrator.organization());
    for repo in &repos {
        let mut flags = vec![if repo.private { "private" } else { "public" }];
        if repo.archived {
            flags.push("archived");
        }
        if repo.fork {
            flags.push("fork");
        }
        println!("  {:<40} [{}] {}", repo.name, flags.join(", "), repo.description());
    }
    println!("Total: {}", repos.len());
    Ok(())
}

async fn cmd_check(config: &AppConfig, env: &Environment) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config, env)?;
    let mut failures = 0usize;

    match orchestrator.github().organization(orchestrator.organization()).await {
        Ok(org) => println!(
            "  {:<12} ok    {} ({} public repositories)",
            "github",
            org.name.as_deref().unwrap_or(&org.login),
            org.public_repos
        ),
        Err(e) => {
            failures += 1;
            println!("  {:<12} FAIL  {e}", "github");
        }
    }

    for (name, result) in orchestrator.test_connections().await {
        match result {
            Ok(detail) => println!("  {name:<12} ok    {detail}"),
            Err(e) => {
                failures += 1;
                println!("  {name:<12} FAIL  {e}");
            }
        }
    }

    let missing = preflight::missing_binaries(config);
    for bin in &missing {
        println!("  {bin:<12} FAIL  not found on PATH");
    }
    failures += missing.len();

    if failures > 0 {
        bail!("{failures} connection check(s) failed");
    }
    println!("All connections OK");
    Ok(())
}

fn cmd_config(path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let yaml = serde_yaml::to_string(config).context("failed to serialize configuration")?;
        println!("{yaml}");
    } else {
        println!("Configuration at '{}' is valid.", path.display());
    }
    if let Some(note) = sync_interval_note(config) {
        println!("{note}");
    }
    if let Err(e) = config.validate_for_backup() {
        println!("Not ready for backups: {e}");
    }
    Ok(())
}

/// A hint when an enabled target wants syncs more often than the
/// supervisor interval allows.
fn sync_interval_note(config: &AppConfig) -> Option<String> {
    let hours = config.backup_targets.shortest_sync_interval_hours()?;
    let interval = config.supervisor.interval_secs;
    (hours.saturating_mul(3600) < interval).then(|| {
        format!("Note: a target asks for a sync every {hours}h but the supervisor runs every {interval}s")
    })
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        bail!("configuration file {} not found", path.display());
    }
    AppConfig::load(path)
        .await
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

async fn load_config_or_default(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        load_config(path).await
    } else {
        Ok(AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_start_and_globals() {
        let cli =
            Cli::try_parse_from(["orgvault", "-c", "org.yaml", "-vv", "start", "--foreground"])
                .unwrap();
        assert_eq!(cli.config, PathBuf::from("org.yaml"));
        assert_eq!(cli.env_file, PathBuf::from(".env"));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Start { foreground: true }));
    }

    #[test]
    fn test_parse_setup_scheduler() {
        let cli = Cli::try_parse_from(["orgvault", "setup", "--scheduler", "systemd"]).unwrap();
        match cli.command {
            Commands::Setup { scheduler, output } => {
                assert_eq!(scheduler, Some(SchedulerKind::Systemd));
                assert_eq!(output, PathBuf::from("scheduler"));
            }
            _ => panic!("expected setup"),
        }
        assert!(Cli::try_parse_from(["orgvault", "setup", "--scheduler", "at"]).is_err());
    }

    #[test]
    fn test_invalid_input_is_rejected() {
        assert!(Cli::try_parse_from(["orgvault"]).is_err());
        assert!(Cli::try_parse_from(["orgvault", "backup-now"]).is_err());
        assert!(Cli::try_parse_from(["orgvault", "status", "-n", "many"]).is_err());
    }

    #[test]
    fn test_control_commands_run_without_config() {
        assert!(!Commands::Stop.requires_config());
        assert!(!Commands::Status { lines: 10 }.requires_config());
        assert!(Commands::Start { foreground: false }.requires_config());
        assert!(Commands::ListRepos.requires_config());
    }

    #[tokio::test]
    async fn test_missing_config_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = load_config(&tmp.path().join("config.yaml"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));

        let config = load_config_or_default(&tmp.path().join("config.yaml"))
            .await
            .unwrap();
        assert_eq!(config.supervisor.interval_secs, 21600);
    }

    #[tokio::test]
    async fn test_invalid_config_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "github: [not, a, mapping]\n").unwrap();
        assert!(load_config(&path).await.is_err());
    }

    #[test]
    fn test_external_command_cycle_needs_no_github() {
        let config = orgvault_test_utils::TestConfigBuilder::new()
            .backup_command(&["sh", "-c", "true"])
            .build();
        let path = Path::new("config.yaml");
        let cycle = build_cycle(path, &config, &Environment::new()).unwrap();
        assert_eq!(cycle.name(), "command");

        let bare = AppConfig::default();
        assert!(build_cycle(path, &bare, &Environment::new()).is_err());
    }

    #[test]
    fn test_sync_interval_note() {
        let mut config = AppConfig::default();
        assert_eq!(sync_interval_note(&config), None);

        config.backup_targets.local_backup.enabled = true;
        config.backup_targets.local_backup.sync_interval_hours = 1;
        config.supervisor.interval_secs = 7200;
        assert_eq!(
            sync_interval_note(&config).as_deref(),
            Some("Note: a target asks for a sync every 1h but the supervisor runs every 7200s")
        );

        config.backup_targets.local_backup.sync_interval_hours = u64::MAX;
        assert_eq!(sync_interval_note(&config), None);
    }
}
