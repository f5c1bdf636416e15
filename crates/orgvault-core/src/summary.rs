//! Results of one backup run and their aggregation.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde_json::{Value, json};

use crate::targets::TargetReport;

/// Outcome of backing up one repository to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupStatus {
    Succeeded(TargetReport),
    Failed(String),
    /// Dry run: the target was not touched.
    DryRun,
}

impl BackupStatus {
    fn label(&self) -> &'static str {
        match self {
            BackupStatus::Succeeded(_) => "success",
            BackupStatus::Failed(_) => "error",
            BackupStatus::DryRun => "dry_run",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupResult {
    pub repository: String,
    pub target: String,
    pub status: BackupStatus,
    pub duration: Duration,
}

impl BackupResult {
    fn to_json(&self) -> Value {
        let mut value = json!({
            "repository": self.repository,
            "target": self.target,
            "status": self.status.label(),
            "duration_seconds": self.duration.as_secs_f64(),
        });
        match &self.status {
            BackupStatus::Succeeded(report) => {
                value["method"] = json!(report.method.to_string());
                value["location"] = json!(report.location);
            }
            BackupStatus::Failed(reason) => value["error"] = json!(reason),
            BackupStatus::DryRun => {}
        }
        value
    }
}

/// Per-target counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetStats {
    pub succeeded: usize,
    pub failed: usize,
    pub dry_run: usize,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub duration: Duration,
    /// Repositories selected for the run.
    pub repositories: usize,
    pub results: Vec<BackupResult>,
    pub per_target: BTreeMap<String, TargetStats>,
}

impl RunSummary {
    /// Aggregate `results` into per-target counters.
    pub fn new(
        started_at: DateTime<Local>,
        duration: Duration,
        repositories: usize,
        results: Vec<BackupResult>,
    ) -> Self {
        let mut per_target: BTreeMap<String, TargetStats> = BTreeMap::new();
        for result in &results {
            let stats = per_target.entry(result.target.clone()).or_default();
            match result.status {
                BackupStatus::Succeeded(_) => stats.succeeded += 1,
                BackupStatus::Failed(_) => stats.failed += 1,
                BackupStatus::DryRun => stats.dry_run += 1,
            }
        }
        Self {
            started_at,
            duration,
            repositories,
            results,
            per_target,
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.per_target.values().map(|s| s.succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.per_target.values().map(|s| s.failed).sum()
    }

    pub fn dry_run(&self) -> usize {
        self.per_target.values().map(|s| s.dry_run).sum()
    }

    /// Failed results with their reasons, in result order.
    pub fn failures(&self) -> impl Iterator<Item = (&BackupResult, &str)> {
        self.results.iter().filter_map(|r| match &r.status {
            BackupStatus::Failed(reason) => Some((r, reason.as_str())),
            _ => None,
        })
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// JSON form used in webhook payloads.
    pub fn to_json(&self) -> Value {
        let targets: serde_json::Map<String, Value> = self
            .per_target
            .iter()
            .map(|(name, s)| {
                (
                    name.clone(),
                    json!({"success": s.succeeded, "failed": s.failed, "dry_run": s.dry_run}),
                )
            })
            .collect();
        json!({
            "timestamp": self.started_at.to_rfc3339(),
            "duration_seconds": self.duration.as_secs_f64(),
            "repositories": self.repositories,
            "total_backups": self.total(),
            "successful": self.succeeded(),
            "failed": self.failed(),
            "dry_run": self.dry_run(),
            "target_summary": targets,
            "results": self.results.iter().map(BackupResult::to_json).collect::<Vec<_>>(),
        })
    }

    /// Plain-text report for the terminal.
    pub fn render(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = String::new();
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "BACKUP SUMMARY");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "{:<16}{}", "Started", self.started_at.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "{:<16}{}", "Repositories", self.repositories);
        let _ = writeln!(out, "{:<16}{}", "Total Backups", self.total());
        let _ = writeln!(out, "{:<16}{}", "Successful", self.succeeded());
        let _ = writeln!(out, "{:<16}{}", "Failed", self.failed());
        if self.dry_run() > 0 {
            let _ = writeln!(out, "{:<16}{}", "Dry Run", self.dry_run());
        }
        let _ = writeln!(
            out,
            "{:<16}{:.2} seconds",
            "Duration",
            self.duration.as_secs_f64()
        );

        if !self.per_target.is_empty() {
            let _ = writeln!(out, "\nTarget Breakdown:");
            let _ = writeln!(
                out,
                "  {:<12}{:>9}{:>9}{:>9}",
                "target", "success", "failed", "dry run"
            );
            for (name, s) in &self.per_target {
                let _ = writeln!(
                    out,
                    "  {:<12}{:>9}{:>9}{:>9}",
                    name, s.succeeded, s.failed, s.dry_run
                );
            }
        }

        let failed = self.failed();
        if failed > 0 {
            let _ = writeln!(out, "\nFailed Backups ({failed}):");
            for (result, reason) in self.failures() {
                let _ = writeln!(out, "  - {} -> {}: {reason}", result.repository, result.target);
            }
        }
        out
    }
}
