//! Resumable runner: repeats batch invocations until a termination condition
//! holds, carrying the scan cursor across invocations and process restarts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::batch::{BatchController, BatchOptions, CursorSink, Selection, ShouldStop};
use crate::cursor::{resolve_start_offset, CursorFingerprint};
use crate::image_refresh::ImageRefreshOptions;
use crate::report::{ReportWriter, RunReport};
use crate::traits::{CursorStore, ScanFilter};
use crate::types::EntityKind;

/// Gallery minimum applied by `full_refresh`.
pub const FULL_REFRESH_MIN_IMAGES: usize = 20;

// ---------------------------------------------------------------------------
// Config & stop reasons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub kind: EntityKind,
    /// Explicit ids; non-empty means a single pass over exactly these.
    pub ids: Vec<Uuid>,
    pub filter: ScanFilter,
    /// Target attempted entities per invocation.
    pub batch_size: u32,
    pub page_size: u32,
    pub delay_ms: u64,
    pub pause_between_runs_ms: u64,
    pub max_runs: u32,
    pub force: bool,
    pub full_refresh: bool,
    pub image_refresh: ImageRefreshOptions,
    pub cursor_enabled: bool,
    pub reset_cursor: bool,
    pub stop_after_no_success_runs: u32,
    /// Database identity recorded in the cursor fingerprint.
    pub data_source: String,
}

impl RunnerConfig {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            ids: Vec::new(),
            filter: ScanFilter::default(),
            batch_size: 25,
            page_size: 100,
            delay_ms: 1_500,
            pause_between_runs_ms: 5_000,
            max_runs: 1_000,
            force: false,
            full_refresh: false,
            image_refresh: ImageRefreshOptions::default(),
            cursor_enabled: true,
            reset_cursor: false,
            stop_after_no_success_runs: 3,
            data_source: String::new(),
        }
    }

    /// Full refresh regenerates everything and re-fetches galleries below
    /// the larger minimum.
    pub fn apply_full_refresh(&mut self) {
        self.full_refresh = true;
        self.force = true;
        self.image_refresh.enabled = true;
        self.image_refresh.min_images = self.image_refresh.min_images.max(FULL_REFRESH_MIN_IMAGES);
    }

    pub fn selection(&self) -> Selection {
        if self.ids.is_empty() {
            Selection::Scan(self.filter.clone())
        } else {
            Selection::Ids(self.ids.clone())
        }
    }

    pub fn fingerprint(&self) -> CursorFingerprint {
        CursorFingerprint::new(self.data_source.clone(), self.kind, &self.filter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// An invocation attempted nothing.
    Exhausted,
    MaxRuns,
    /// Consecutive invocations with failures and no successes.
    NoProgress,
    /// Entities were attempted but the cursor did not move.
    Stuck,
    Canceled,
    /// Explicit id list processed once.
    SinglePass,
    Fatal,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::Exhausted => "exhausted",
            StopReason::MaxRuns => "max runs reached",
            StopReason::NoProgress => "no progress",
            StopReason::Stuck => "stuck",
            StopReason::Canceled => "canceled",
            StopReason::SinglePass => "single pass",
            StopReason::Fatal => "fatal error",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ResumableRunner
// ---------------------------------------------------------------------------

pub struct ResumableRunner {
    config: RunnerConfig,
    controller: BatchController,
    cursor_store: Option<Arc<dyn CursorStore>>,
    report_writer: Option<ReportWriter>,
    should_stop: Option<ShouldStop>,
}

impl ResumableRunner {
    pub fn new(config: RunnerConfig, controller: BatchController) -> Self {
        Self {
            config,
            controller,
            cursor_store: None,
            report_writer: None,
            should_stop: None,
        }
    }

    /// Persist the scan position here when `cursor_enabled`.
    pub fn with_cursor_store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.cursor_store = Some(store);
        self
    }

    pub fn with_report_writer(mut self, writer: ReportWriter) -> Self {
        self.report_writer = Some(writer);
        self
    }

    pub fn with_should_stop(mut self, should_stop: ShouldStop) -> Self {
        self.should_stop = Some(should_stop);
        self
    }

    pub fn controller(&self) -> &BatchController {
        &self.controller
    }

    /// Run to completion. The report is written before any error propagates.
    pub async fn run(&mut self) -> Result<RunReport> {
        let mut report = RunReport::start(self.config.clone());
        info!(
            run_id = %report.run_id,
            kind = %self.config.kind,
            ids = self.config.ids.len(),
            batch_size = self.config.batch_size,
            max_runs = self.config.max_runs,
            force = self.config.force,
            full_refresh = self.config.full_refresh,
            refresh_images = self.config.image_refresh.enabled,
            "Backfill run starting"
        );

        match self.drive(&mut report).await {
            Ok(reason) => {
                report.finish(reason);
                info!(
                    run_id = %report.run_id,
                    stop_reason = %reason,
                    runs = report.runs,
                    success = report.totals.success,
                    failed = report.totals.failed,
                    cost_usd = report.totals.total_cost_usd,
                    "Backfill run finished"
                );
                if let Some(writer) = &self.report_writer {
                    writer.write(&report)?;
                }
                Ok(report)
            }
            Err(e) => {
                report.finish_fatal(&e);
                error!(run_id = %report.run_id, error = %format!("{e:#}"), "Backfill run failed");
                if let Some(writer) = &self.report_writer {
                    if let Err(write_err) = writer.write(&report) {
                        error!(error = %format!("{write_err:#}"), "Failed to write run report");
                    }
                }
                Err(e)
            }
        }
    }

    async fn drive(&mut self, report: &mut RunReport) -> Result<StopReason> {
        let selection = self.config.selection();
        let single_pass = matches!(selection, Selection::Ids(_));

        let cursor = match (&self.cursor_store, self.config.cursor_enabled && !single_pass) {
            (Some(store), true) => Some(CursorSink {
                store: store.clone(),
                fingerprint: self.config.fingerprint(),
            }),
            _ => None,
        };

        let mut offset = match &cursor {
            Some(sink) => {
                resolve_start_offset(sink.store.as_ref(), &sink.fingerprint, self.config.reset_cursor)
                    .await?
            }
            None => 0,
        };
        if !single_pass {
            report.start_offset = Some(offset);
            report.final_offset = Some(offset);
        }

        let mut no_success_streak = 0u32;

        loop {
            if report.runs >= self.config.max_runs {
                info!(max_runs = self.config.max_runs, "Max runs reached");
                return Ok(StopReason::MaxRuns);
            }
            if self.stop_requested() {
                info!("Stop requested before next invocation");
                return Ok(StopReason::Canceled);
            }

            let run = report.runs + 1;
            info!(run, offset, "Invocation starting");

            let options = BatchOptions {
                kind: self.config.kind,
                selection: selection.clone(),
                limit: (!single_pass).then_some(self.config.batch_size),
                page_size: self.config.page_size,
                start_offset: offset,
                force: self.config.force,
                delay: Duration::from_millis(self.config.delay_ms),
                should_stop: self.should_stop.clone(),
                cursor: cursor.clone(),
            };

            let result = match self.controller.run(&options).await {
                Ok(result) => result,
                Err(aborted) => {
                    report.record(&aborted.partial);
                    warn!(run, partial = %aborted.partial, "Invocation aborted");
                    return Err(aborted.into());
                }
            };
            report.record(&result);
            info!(run, %result, "Invocation finished");

            if result.canceled {
                return Ok(StopReason::Canceled);
            }
            if single_pass {
                return Ok(StopReason::SinglePass);
            }
            if result.attempted == 0 {
                info!(offset = result.next_offset, "Nothing left to attempt");
                if let Some(sink) = &cursor {
                    sink.store.clear().await?;
                }
                return Ok(StopReason::Exhausted);
            }

            let next = result.next_offset.unwrap_or(offset);
            if next <= offset {
                warn!(
                    run,
                    offset,
                    attempted = result.attempted,
                    "Cursor did not advance despite attempts, stopping"
                );
                return Ok(StopReason::Stuck);
            }
            info!(from = offset, to = next, "Cursor advanced");
            offset = next;

            if result.success == 0 && result.failed > 0 {
                no_success_streak += 1;
                warn!(
                    run,
                    streak = no_success_streak,
                    limit = self.config.stop_after_no_success_runs,
                    "Invocation produced failures and no successes"
                );
                if no_success_streak >= self.config.stop_after_no_success_runs {
                    warn!(
                        streak = no_success_streak,
                        "Stopping: consecutive invocations without success"
                    );
                    return Ok(StopReason::NoProgress);
                }
            } else {
                no_success_streak = 0;
            }

            if self.config.pause_between_runs_ms > 0 && report.runs < self.config.max_runs {
                tokio::time::sleep(Duration::from_millis(self.config.pause_between_runs_ms)).await;
            }
        }
    }

    fn stop_requested(&self) -> bool {
        self.should_stop.as_ref().is_some_and(|stop| stop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_refresh_implies_force_and_larger_gallery_minimum() {
        let mut config = RunnerConfig::new(EntityKind::Property);
        config.apply_full_refresh();
        assert!(config.force);
        assert!(config.image_refresh.enabled);
        assert_eq!(config.image_refresh.min_images, FULL_REFRESH_MIN_IMAGES);
    }

    #[test]
    fn full_refresh_keeps_a_higher_gallery_minimum() {
        let mut config = RunnerConfig::new(EntityKind::Property);
        config.image_refresh.min_images = 30;
        config.apply_full_refresh();
        assert_eq!(config.image_refresh.min_images, 30);
    }

    #[test]
    fn ids_select_single_pass() {
        let mut config = RunnerConfig::new(EntityKind::Neighborhood);
        assert!(matches!(config.selection(), Selection::Scan(_)));
        config.ids = vec![Uuid::new_v4()];
        assert!(matches!(config.selection(), Selection::Ids(_)));
    }

    #[test]
    fn stop_reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(StopReason::NoProgress).unwrap(),
            "no_progress"
        );
    }
}
