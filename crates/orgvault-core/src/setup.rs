//! Scheduler unit generation for running backups from cron, systemd or
//! launchd instead of the resident supervisor.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("unknown scheduler {0:?} (expected cron, systemd or launchd)")]
    UnknownScheduler(String),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    Cron,
    Systemd,
    Launchd,
}

impl SchedulerKind {
    /// launchd on macOS, systemd when it is the running init, else cron.
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            SchedulerKind::Launchd
        } else if Path::new("/run/systemd/system").exists() {
            SchedulerKind::Systemd
        } else {
            SchedulerKind::Cron
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchedulerKind::Cron => "cron",
            SchedulerKind::Systemd => "systemd",
            SchedulerKind::Launchd => "launchd",
        })
    }
}

impl FromStr for SchedulerKind {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cron" => Ok(SchedulerKind::Cron),
            "systemd" => Ok(SchedulerKind::Systemd),
            "launchd" => Ok(SchedulerKind::Launchd),
            other => Err(SetupError::UnknownScheduler(other.to_string())),
        }
    }
}

/// Paths and cadence baked into the units.
#[derive(Debug, Clone)]
pub struct UnitContext {
    pub exe: PathBuf,
    pub config: PathBuf,
    pub working_dir: PathBuf,
    pub log_file: PathBuf,
    pub interval: Duration,
}

impl UnitContext {
    fn run_args(&self) -> [String; 4] {
        [
            self.exe.display().to_string(),
            "-c".to_string(),
            self.config.display().to_string(),
            "run".to_string(),
        ]
    }

    /// Whole hours between runs, within what a cron step can express.
    fn interval_hours(&self) -> u64 {
        (self.interval.as_secs() / 3600).clamp(1, 24)
    }
}

/// A generated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub file_name: String,
    pub contents: String,
}

pub fn render(kind: SchedulerKind, ctx: &UnitContext) -> Vec<Unit> {
    match kind {
        SchedulerKind::Cron => vec![Unit {
            file_name: "orgvault.cron".to_string(),
            contents: render_cron(ctx),
        }],
        SchedulerKind::Systemd => vec![
            Unit {
                file_name: "orgvault.service".to_string(),
                contents: render_service(ctx),
            },
            Unit {
                file_name: "orgvault.timer".to_string(),
                contents: render_timer(ctx),
            },
        ],
        SchedulerKind::Launchd => vec![Unit {
            file_name: "com.orgvault.backup.plist".to_string(),
            contents: render_plist(ctx),
        }],
    }
}

fn render_cron(ctx: &UnitContext) -> String {
    let quote = |s: &str| cron_escape(&shell_quote(s));
    let command: Vec<String> = ctx.run_args().iter().map(|a| quote(a)).collect();
    format!(
        "0 */{} * * * cd {} && {} >> {} 2>&1\n",
        ctx.interval_hours(),
        quote(&ctx.working_dir.display().to_string()),
        command.join(" "),
        quote(&ctx.log_file.display().to_string()),
    )
}

/// cron turns an unescaped `%` into a newline, even inside quotes.
fn cron_escape(s: &str) -> String {
    s.replace('%', r"\%")
}

fn render_service(ctx: &UnitContext) -> String {
    let exec: Vec<String> = ctx.run_args().iter().map(|a| systemd_quote(a)).collect();
    format!(
        "[Unit]\n\
         Description=orgvault GitHub organization backup\n\
         Wants=network-online.target\n\
         After=network-online.target\n\
         \n\
         [Service]\n\
         Type=oneshot\n\
         WorkingDirectory={}\n\
         EnvironmentFile=-{}\n\
         ExecStart={}\n",
        ctx.working_dir.display(),
        ctx.working_dir.join(".env").display(),
        exec.join(" "),
    )
}

fn render_timer(ctx: &UnitContext) -> String {
    format!(
        "[Unit]\n\
         Description=Run orgvault backups periodically\n\
         \n\
         [Timer]\n\
         OnBootSec=5min\n\
         OnUnitActiveSec={}s\n\
         Persistent=true\n\
         \n\
         [Install]\n\
         WantedBy=timers.target\n",
        ctx.interval.as_secs(),
    )
}

fn render_plist(ctx: &UnitContext) -> String {
    let args: String = ctx
        .run_args()
        .iter()
        .map(|a| format!("        <string>{}</string>\n", xml_escape(a)))
        .collect();
    let log = xml_escape(&ctx.log_file.display().to_string());
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>com.orgvault.backup</string>
    <key>ProgramArguments</key>
    <array>
{args}    </array>
    <key>WorkingDirectory</key>
    <string>{}</string>
    <key>StartInterval</key>
    <integer>{}</integer>
    <key>StandardOutPath</key>
    <string>{log}</string>
    <key>StandardErrorPath</key>
    <string>{log}</string>
</dict>
</plist>
"#,
        xml_escape(&ctx.working_dir.display().to_string()),
        ctx.interval.as_secs(),
    )
}

/// Write `units` into `dir`, returning the written paths.
pub fn write_units(units: &[Unit], dir: &Path) -> Result<Vec<PathBuf>, SetupError> {
    std::fs::create_dir_all(dir).map_err(|source| SetupError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    units
        .iter()
        .map(|unit| {
            let path = dir.join(&unit.file_name);
            std::fs::write(&path, &unit.contents).map_err(|source| SetupError::Io {
                path: path.clone(),
                source,
            })?;
            info!(path = %path.display(), "Wrote scheduler unit");
            Ok(path)
        })
        .collect()
}

/// Operator instructions for installing the written units.
pub fn install_instructions(kind: SchedulerKind, paths: &[PathBuf]) -> String {
    let shown: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    match kind {
        SchedulerKind::Cron => format!(
            "Append the line in {} to your crontab:\n  (crontab -l; cat {}) | crontab -",
            shown.join(", "),
            shown.first().map(String::as_str).unwrap_or("orgvault.cron"),
        ),
        SchedulerKind::Systemd => format!(
            "Install the units and enable the timer:\n  sudo cp {} /etc/systemd/system/\n  sudo systemctl daemon-reload\n  sudo systemctl enable --now orgvault.timer",
            shown.join(" "),
        ),
        SchedulerKind::Launchd => format!(
            "Install the agent:\n  cp {} ~/Library/LaunchAgents/\n  launchctl load ~/Library/LaunchAgents/com.orgvault.backup.plist",
            shown.join(" "),
        ),
    }
}

fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

fn systemd_quote(s: &str) -> String {
    if s.contains(char::is_whitespace) || s.contains('"') {
        format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        s.to_string()
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
