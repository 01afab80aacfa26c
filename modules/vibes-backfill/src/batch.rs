//! Batch cursor controller.
//!
//! One invocation walks either an explicit id list or the ordered scan
//! (`created_at DESC, id DESC`), decides skip vs. process per entity from the
//! stored source hashes, hands attempted entities to the enricher and keeps
//! per-invocation counters. Enrichment failures are recorded and the walk
//! continues; store and cursor failures abort the invocation, returning the
//! counters gathered so far in [`BatchAborted`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cursor::{CursorFingerprint, PersistedCursor};
use crate::enrich::VibesEnricher;
use crate::error::{error_code, BackfillError};
use crate::source_hash::should_skip;
use crate::traits::{CursorStore, EntityStore, ScanFilter};
use crate::types::{BatchCursor, Entity, EntityKind, FailureRecord};

/// Cooperative stop signal, polled before every entity.
pub type ShouldStop = Arc<dyn Fn() -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// Options & result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Ids(Vec<Uuid>),
    Scan(ScanFilter),
}

/// Where the scan position is persisted after every entity.
#[derive(Clone)]
pub struct CursorSink {
    pub store: Arc<dyn CursorStore>,
    pub fingerprint: CursorFingerprint,
}

#[derive(Clone)]
pub struct BatchOptions {
    pub kind: EntityKind,
    pub selection: Selection,
    /// Target number of attempted entities; `None` walks everything.
    pub limit: Option<u32>,
    pub page_size: u32,
    pub start_offset: u64,
    pub force: bool,
    /// Pause after each attempted entity.
    pub delay: Duration,
    pub should_stop: Option<ShouldStop>,
    pub cursor: Option<CursorSink>,
}

impl BatchOptions {
    pub fn new(kind: EntityKind, selection: Selection) -> Self {
        Self {
            kind,
            selection,
            limit: None,
            page_size: 100,
            start_offset: 0,
            force: false,
            delay: Duration::ZERO,
            should_stop: None,
            cursor: None,
        }
    }

    fn stop_requested(&self) -> bool {
        self.should_stop.as_ref().is_some_and(|stop| stop())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub attempted: u32,
    pub skipped: u32,
    pub success: u32,
    pub failed: u32,
    pub total_cost_usd: f64,
    pub total_time_ms: u64,
    pub failures: Vec<FailureRecord>,
    /// Scan position after this invocation; `None` for id lists.
    pub next_offset: Option<u64>,
    pub canceled: bool,
}

impl std::fmt::Display for BatchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "attempted={} skipped={} success={} failed={} cost=${:.4} time={}ms",
            self.attempted,
            self.skipped,
            self.success,
            self.failed,
            self.total_cost_usd,
            self.total_time_ms
        )?;
        if let Some(offset) = self.next_offset {
            write!(f, " next_offset={offset}")?;
        }
        if self.canceled {
            write!(f, " (canceled)")?;
        }
        Ok(())
    }
}

/// An invocation that hit a store or cursor error. `partial` holds what was
/// processed before the abort.
#[derive(Debug, thiserror::Error)]
#[error("Invocation aborted after {} attempted entities", .partial.attempted)]
pub struct BatchAborted {
    pub partial: BatchResult,
    #[source]
    pub error: anyhow::Error,
}

// ---------------------------------------------------------------------------
// BatchController
// ---------------------------------------------------------------------------

pub struct BatchController {
    store: Arc<dyn EntityStore>,
    enricher: VibesEnricher,
}

struct Walk {
    progress: BatchCursor,
    failures: Vec<FailureRecord>,
    canceled: bool,
}

impl Walk {
    fn limit_reached(&self, limit: Option<u32>) -> bool {
        limit.is_some_and(|limit| self.progress.attempted >= limit)
    }
}

impl BatchController {
    pub fn new(store: Arc<dyn EntityStore>, enricher: VibesEnricher) -> Self {
        Self { store, enricher }
    }

    pub fn enricher(&self) -> &VibesEnricher {
        &self.enricher
    }

    pub async fn run(&mut self, options: &BatchOptions) -> Result<BatchResult, BatchAborted> {
        let started = Instant::now();
        let mut walk = Walk {
            progress: BatchCursor {
                offset: options.start_offset,
                ..Default::default()
            },
            failures: Vec::new(),
            canceled: false,
        };

        let outcome = self.walk_selection(options, &mut walk).await;

        let Walk {
            progress,
            failures,
            canceled,
        } = walk;

        let result = BatchResult {
            attempted: progress.attempted,
            skipped: progress.skipped,
            success: progress.success,
            failed: progress.failed,
            total_cost_usd: progress.total_cost_usd,
            total_time_ms: started.elapsed().as_millis() as u64,
            failures,
            next_offset: match options.selection {
                Selection::Ids(_) => None,
                Selection::Scan(_) => Some(progress.offset),
            },
            canceled,
        };

        match outcome {
            Ok(()) => Ok(result),
            Err(error) => Err(BatchAborted {
                partial: result,
                error,
            }),
        }
    }

    async fn walk_selection(&mut self, options: &BatchOptions, walk: &mut Walk) -> Result<()> {
        match &options.selection {
            Selection::Ids(ids) => {
                let entities = self.load_ids(options.kind, ids).await?;
                self.walk_entities(entities, options, walk, false).await
            }
            Selection::Scan(filter) => self.walk_scan(filter, options, walk).await,
        }
    }

    /// Fetch exactly the requested ids, in request order.
    async fn load_ids(&self, kind: EntityKind, ids: &[Uuid]) -> Result<Vec<Entity>> {
        let fetched = self
            .store
            .fetch_by_ids(kind, ids)
            .await
            .map_err(|source| BackfillError::DataSource {
                operation: "fetch_by_ids",
                source,
            })?;

        let mut by_id: HashMap<Uuid, Entity> = fetched.into_iter().map(|e| (e.id(), e)).collect();
        let mut ordered = Vec::with_capacity(ids.len());
        for id in ids {
            match by_id.remove(id) {
                Some(entity) => ordered.push(entity),
                None => warn!(%id, %kind, "Requested entity not found"),
            }
        }
        Ok(ordered)
    }

    async fn walk_scan(
        &mut self,
        filter: &ScanFilter,
        options: &BatchOptions,
        walk: &mut Walk,
    ) -> Result<()> {
        loop {
            if walk.limit_reached(options.limit) {
                break;
            }
            if options.stop_requested() {
                walk.canceled = true;
                info!(offset = walk.progress.offset, "Stop requested, ending batch");
                break;
            }

            let page = self
                .store
                .fetch_page(options.kind, filter, walk.progress.offset, options.page_size)
                .await
                .map_err(|source| BackfillError::DataSource {
                    operation: "fetch_page",
                    source,
                })?;

            if page.is_empty() {
                debug!(offset = walk.progress.offset, "Scan exhausted");
                break;
            }
            debug!(
                offset = walk.progress.offset,
                rows = page.len(),
                "Fetched page"
            );

            self.walk_entities(page, options, walk, true).await?;
            if walk.canceled {
                break;
            }
        }
        Ok(())
    }

    async fn walk_entities(
        &mut self,
        entities: Vec<Entity>,
        options: &BatchOptions,
        walk: &mut Walk,
        advance_offset: bool,
    ) -> Result<()> {
        let stored = if options.force || entities.is_empty() {
            HashMap::new()
        } else {
            let ids: Vec<Uuid> = entities.iter().map(Entity::id).collect();
            self.store
                .existing_hashes(options.kind, &ids)
                .await
                .map_err(|source| BackfillError::DataSource {
                    operation: "existing_hashes",
                    source,
                })?
        };

        for mut entity in entities {
            if walk.limit_reached(options.limit) {
                break;
            }
            if options.stop_requested() {
                walk.canceled = true;
                info!(
                    attempted = walk.progress.attempted,
                    "Stop requested, ending batch after current entity"
                );
                break;
            }

            let id = entity.id();
            let fresh = entity.source_hash();
            let attempted = if should_skip(options.force, stored.get(&id).map(String::as_str), &fresh) {
                walk.progress.skipped += 1;
                debug!(%id, "Source unchanged, skipping");
                false
            } else {
                walk.progress.attempted += 1;
                self.attempt(&mut entity, walk).await;
                true
            };

            if advance_offset {
                walk.progress.offset += 1;
            }
            walk.progress.last_entity_id = Some(id);

            if advance_offset {
                if let Some(sink) = &options.cursor {
                    let cursor = PersistedCursor::new(sink.fingerprint.clone(), walk.progress.clone());
                    sink.store
                        .save(&cursor)
                        .await
                        .map_err(BackfillError::CursorPersistence)?;
                }
            }

            if attempted && !options.delay.is_zero() {
                tokio::time::sleep(options.delay).await;
            }
        }
        Ok(())
    }

    async fn attempt(&mut self, entity: &mut Entity, walk: &mut Walk) {
        let label = entity.label();
        match self.enricher.enrich(entity).await {
            Ok(enrichment) => {
                walk.progress.success += 1;
                walk.progress.total_cost_usd += enrichment.cost_usd;
                info!(
                    id = %entity.id(),
                    kind = %entity.kind(),
                    label = %label,
                    cost_usd = enrichment.cost_usd,
                    "Vibes stored"
                );
            }
            Err(e) => {
                walk.progress.failed += 1;
                let code = error_code(&e);
                warn!(
                    id = %entity.id(),
                    kind = %entity.kind(),
                    label = %label,
                    error = %format!("{e:#}"),
                    code = code.as_deref().unwrap_or("-"),
                    "Enrichment failed"
                );
                walk.failures.push(FailureRecord {
                    entity_id: entity.id(),
                    kind: entity.kind(),
                    label,
                    error_message: format!("{e:#}"),
                    error_code: code,
                });
            }
        }
    }
}
