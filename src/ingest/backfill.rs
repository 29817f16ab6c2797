//! Warm-start and full historical backfill
//!
//! Runs after bootstrap: first a one-shot warm-start fetch per type covering
//! the recent week, then a batched walk backwards to the full history target.
//! The checkpoint is persisted after every durable step, so a crash or
//! cancellation resumes where it stopped instead of refetching.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::engine::EngineHandle;
use crate::error::PipelineError;
use crate::harness::{classify_fetch, run_with_deadline, FetchOutcome};
use crate::source::{AccessStatus, DateRange, HealthSource};
use crate::store::{Store, PROGRESS_KEY};
use crate::types::{BackfillProgress, SampleType};

pub(super) struct Backfill {
    pub(super) engine: EngineHandle,
    pub(super) source: Arc<dyn HealthSource>,
    pub(super) store: Arc<dyn Store>,
    pub(super) config: Arc<PipelineConfig>,
    pub(super) cancel: CancellationToken,
}

impl Backfill {
    pub(super) async fn run(self) {
        let mut progress = self.load_progress().await;
        let readable = match self.readable_types(&mut progress).await {
            Some(types) => types,
            None => return,
        };

        self.warm_start(&mut progress, &readable).await;
        if self.cancel.is_cancelled() {
            return;
        }
        self.full_backfill(&mut progress, &readable).await;
    }

    /// Load the persisted checkpoint. A blob with an unknown schema version
    /// or parse failure is discarded; backfill restarts from scratch.
    async fn load_progress(&self) -> BackfillProgress {
        let blob = match self.store.load_blob(PROGRESS_KEY).await {
            Ok(blob) => blob,
            Err(err) => {
                tracing::warn!("backfill checkpoint unreadable: {err}");
                return BackfillProgress::default();
            }
        };
        match blob {
            Some(json) => match BackfillProgress::from_json(&json) {
                Ok(progress) => progress,
                Err(err) => {
                    tracing::warn!("backfill checkpoint discarded: {err}");
                    BackfillProgress::default()
                }
            },
            None => BackfillProgress::default(),
        }
    }

    async fn save_progress(&self, progress: &BackfillProgress) {
        match progress.to_json() {
            Ok(json) => {
                if let Err(err) = self.store.save_blob(PROGRESS_KEY, &json).await {
                    tracing::warn!("backfill checkpoint not persisted: {err}");
                }
            }
            Err(err) => tracing::warn!("backfill checkpoint not serializable: {err}"),
        }
    }

    /// Probe access; revoked types have their checkpoint cleared so a later
    /// re-grant starts clean. Returns `None` when nothing is readable.
    async fn readable_types(
        &self,
        progress: &mut BackfillProgress,
    ) -> Option<Vec<SampleType>> {
        let access = match self.source.probe_read_access(&SampleType::ALL).await {
            Ok(access) => access,
            Err(err) => {
                tracing::warn!("read-access probe failed: {err}");
                return None;
            }
        };
        let mut cleared = false;
        for ty in SampleType::ALL {
            if access.get(&ty) == Some(&AccessStatus::Denied)
                && progress.sources.contains_key(&ty)
            {
                tracing::info!(ty = ty.as_str(), "access revoked; checkpoint cleared");
                progress.clear(ty);
                cleared = true;
            }
        }
        if cleared {
            self.save_progress(progress).await;
        }
        let readable: Vec<SampleType> = SampleType::ALL
            .into_iter()
            .filter(|ty| access.get(ty) != Some(&AccessStatus::Denied))
            .collect();
        (!readable.is_empty()).then_some(readable)
    }

    /// One wide fetch per type covering the recent week. Marked done for
    /// every outcome except a genuine error, so only failed types rerun on
    /// the next scheduling.
    async fn warm_start(&self, progress: &mut BackfillProgress, types: &[SampleType]) {
        let today = Utc::now().date_naive();
        let range = DateRange::days_back(today, self.config.warm_start_days);
        for ty in types {
            if progress.source(*ty).warm_start_done {
                continue;
            }
            match self.fetch_batch(*ty, range).await {
                FetchOutcome::Cancelled => return,
                FetchOutcome::Error => {
                    tracing::warn!(ty = ty.as_str(), "warm start failed");
                }
                FetchOutcome::Success | FetchOutcome::Empty | FetchOutcome::Timeout => {
                    progress.mark_warm_start(*ty);
                    progress.record_processed(*ty, range.start);
                    self.save_progress(progress).await;
                }
            }
        }
    }

    /// Walk each type's history backwards in fixed-width batches until the
    /// full-history target is reached. Each pass visits every pending type
    /// once, most history remaining first, so a persistently failing type
    /// cannot starve the others; a pass that moves no checkpoint at all ends
    /// the run, leaving the remainder to the next scheduling.
    async fn full_backfill(&self, progress: &mut BackfillProgress, types: &[SampleType]) {
        let today = Utc::now().date_naive();
        let target = today - Duration::days(self.config.full_backfill_days);
        let mut iterations = 0u32;

        loop {
            let pending = pending_types(progress, types, target);
            if pending.is_empty() {
                return;
            }
            let mut advanced = false;
            for ty in pending {
                if self.cancel.is_cancelled() {
                    return;
                }
                iterations += 1;
                if iterations > self.config.backfill_iteration_cap {
                    tracing::warn!("backfill iteration cap reached");
                    return;
                }

                let end = match progress.source(ty).earliest_processed {
                    Some(earliest) => earliest - Duration::days(1),
                    None => today,
                };
                let start =
                    (end - Duration::days(self.config.backfill_batch_days - 1)).max(target);
                let range = DateRange::new(start, end);

                match self.fetch_batch(ty, range).await {
                    FetchOutcome::Cancelled => return,
                    FetchOutcome::Timeout | FetchOutcome::Error => {
                        // Retried on the next pass, if anything else moves.
                    }
                    FetchOutcome::Success | FetchOutcome::Empty => {
                        progress.record_processed(ty, start);
                        if start <= target {
                            progress.mark_full_backfill(ty);
                            tracing::info!(ty = ty.as_str(), "full backfill complete");
                        }
                        self.save_progress(progress).await;
                        advanced = true;
                    }
                }

                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.config.backfill_pause) => {}
                }
            }
            if !advanced {
                tracing::warn!("backfill pass made no progress; stopping");
                return;
            }
        }
    }

    /// Fetch one range and feed it to the engine. High-volume types fall
    /// back to daily aggregates when no raw samples exist in the range.
    async fn fetch_batch(&self, ty: SampleType, range: DateRange) -> FetchOutcome {
        let fetched = tokio::select! {
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled),
            result = run_with_deadline(
                self.config.retry_timeout_cap,
                self.source.fetch_samples(ty, range),
            ) => result,
        };
        let (outcome, samples) = classify_fetch(fetched);
        if !samples.is_empty() {
            if let Err(err) = self.engine.ingest_samples(samples).await {
                tracing::warn!(ty = ty.as_str(), "backfill ingest failed: {err}");
                return FetchOutcome::Error;
            }
        }
        if outcome != FetchOutcome::Empty || !ty.is_high_volume() {
            return outcome;
        }

        let fetched = tokio::select! {
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled),
            result = run_with_deadline(
                self.config.retry_timeout_cap,
                self.source.fetch_daily_aggregates(ty, range),
            ) => result,
        };
        let (outcome, aggregates) = classify_fetch(fetched);
        if !aggregates.is_empty() {
            if let Err(err) = self.engine.ingest_aggregates(aggregates).await {
                tracing::warn!(ty = ty.as_str(), "aggregate ingest failed: {err}");
                return FetchOutcome::Error;
            }
        }
        outcome
    }
}

/// Readable types still short of the target, most history remaining first.
/// No checkpoint yet means the whole window remains.
fn pending_types(
    progress: &BackfillProgress,
    types: &[SampleType],
    target: NaiveDate,
) -> Vec<SampleType> {
    let mut pending: Vec<SampleType> = types
        .iter()
        .filter(|ty| {
            let entry = progress.source(**ty);
            !entry.full_backfill_done
                && entry.earliest_processed.map_or(true, |d| d > target)
        })
        .copied()
        .collect();
    pending.sort_by_key(|ty| {
        std::cmp::Reverse(
            progress
                .source(*ty)
                .earliest_processed
                .unwrap_or(NaiveDate::MAX),
        )
    });
    pending
}
