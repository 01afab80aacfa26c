//! Run report: persisted JSON summary of a whole runner session.
//!
//! Every session writes `{report_dir}/latest.json` and an archived
//! `{report_dir}/run-{timestamp}.json`, including sessions that stop early or
//! end in a fatal error.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::batch::BatchResult;
use crate::runner::{RunnerConfig, StopReason};
use crate::types::FailureRecord;

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub attempted: u32,
    pub skipped: u32,
    pub success: u32,
    pub failed: u32,
    pub total_cost_usd: f64,
}

/// One batch invocation as seen by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationSummary {
    pub run: u32,
    pub attempted: u32,
    pub skipped: u32,
    pub success: u32,
    pub failed: u32,
    pub cost_usd: f64,
    pub time_ms: u64,
    pub next_offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub config: RunnerConfig,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub wall_clock_ms: u64,
    pub runs: u32,
    pub totals: RunTotals,
    pub stop_reason: Option<StopReason>,
    pub start_offset: Option<u64>,
    pub final_offset: Option<u64>,
    /// Set when the session ended in a propagated error.
    pub error: Option<String>,
    pub invocations: Vec<InvocationSummary>,
    pub failures: Vec<FailureRecord>,
}

impl RunReport {
    pub fn start(config: RunnerConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            config,
            started_at: Utc::now(),
            finished_at: None,
            wall_clock_ms: 0,
            runs: 0,
            totals: RunTotals::default(),
            stop_reason: None,
            start_offset: None,
            final_offset: None,
            error: None,
            invocations: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Fold one invocation into the session totals.
    pub fn record(&mut self, result: &BatchResult) {
        self.runs += 1;
        self.totals.attempted += result.attempted;
        self.totals.skipped += result.skipped;
        self.totals.success += result.success;
        self.totals.failed += result.failed;
        self.totals.total_cost_usd += result.total_cost_usd;
        if result.next_offset.is_some() {
            self.final_offset = result.next_offset;
        }
        self.failures.extend(result.failures.iter().cloned());
        self.invocations.push(InvocationSummary {
            run: self.runs,
            attempted: result.attempted,
            skipped: result.skipped,
            success: result.success,
            failed: result.failed,
            cost_usd: result.total_cost_usd,
            time_ms: result.total_time_ms,
            next_offset: result.next_offset,
        });
    }

    pub fn finish(&mut self, reason: StopReason) {
        let finished_at = Utc::now();
        self.wall_clock_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(finished_at);
        self.stop_reason = Some(reason);
    }

    pub fn finish_fatal(&mut self, err: &anyhow::Error) {
        self.error = Some(format!("{err:#}"));
        self.finish(StopReason::Fatal);
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Vibes Backfill Complete ===")?;
        writeln!(f, "Kind:         {}", self.config.kind)?;
        writeln!(f, "Invocations:  {}", self.runs)?;
        writeln!(f, "Attempted:    {}", self.totals.attempted)?;
        writeln!(f, "Skipped:      {}", self.totals.skipped)?;
        writeln!(f, "Succeeded:    {}", self.totals.success)?;
        writeln!(f, "Failed:       {}", self.totals.failed)?;
        writeln!(f, "Cost:         ${:.4}", self.totals.total_cost_usd)?;
        writeln!(f, "Wall clock:   {:.1}s", self.wall_clock_ms as f64 / 1000.0)?;
        if let Some(offset) = self.final_offset {
            writeln!(f, "Final offset: {offset}")?;
        }
        match self.stop_reason {
            Some(reason) => writeln!(f, "Stopped:      {reason}")?,
            None => writeln!(f, "Stopped:      (unfinished)")?,
        }
        if let Some(error) = &self.error {
            writeln!(f, "Error:        {error}")?;
        }
        if !self.failures.is_empty() {
            writeln!(f, "\nFailures:")?;
            for failure in self.failures.iter().take(20) {
                writeln!(
                    f,
                    "  {} {}: {}",
                    failure.entity_id, failure.label, failure.error_message
                )?;
            }
            if self.failures.len() > 20 {
                writeln!(f, "  ... and {} more (see report file)", self.failures.len() - 20)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ReportWriter
// ---------------------------------------------------------------------------

pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `latest.json` and the timestamped archive. Returns the archive path.
    pub fn write(&self, report: &RunReport) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating report directory {}", self.dir.display()))?;

        let json = serde_json::to_string_pretty(report)?;
        let stamp = report
            .finished_at
            .unwrap_or(report.started_at)
            .format("%Y%m%dT%H%M%S%.3fZ");
        let archive = self.dir.join(format!("run-{stamp}.json"));
        let latest = self.dir.join("latest.json");

        std::fs::write(&archive, &json)
            .with_context(|| format!("writing {}", archive.display()))?;
        std::fs::write(&latest, &json).with_context(|| format!("writing {}", latest.display()))?;

        info!(
            path = %archive.display(),
            failures = report.failures.len(),
            "Run report saved"
        );
        Ok(archive)
    }
}
