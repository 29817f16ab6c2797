//! Pipeline engine
//!
//! The single logical writer: one worker task owns every mutation of daily,
//! baseline, and feature records, fed through an mpsc inbox. Concurrent
//! callers are serialized, so two overlapping reprocessing calls for the same
//! day can never race on a record. The cloneable [`EngineHandle`] is the read
//! and write API consumed by the orchestrator and by downstream coaching/UI.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::aggregator::Aggregator;
use crate::baseline::BaselineEngine;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::estimator::WellbeingEstimator;
use crate::features::{FeatureBundleBuilder, SubjectiveInputs};
use crate::store::{Store, ESTIMATOR_KEY};
use crate::types::{
    Baseline, DailyAggregate, DailyMetrics, DailySummary, FeatureKey, FeatureMeta,
    FeatureVector, ImputedFlags, MetricBreakdown, MetricKey, Sample, SnapshotView,
};

/// Days scanned when reconciling sample deletions that arrive without a day.
const DELETION_SCAN_DAYS: i64 = 35;

enum Command {
    IngestSamples {
        samples: Vec<Sample>,
        reply: oneshot::Sender<Result<Vec<NaiveDate>, PipelineError>>,
    },
    IngestAggregates {
        aggregates: Vec<DailyAggregate>,
        reply: oneshot::Sender<Result<Vec<NaiveDate>, PipelineError>>,
    },
    DeleteSamples {
        ids: Vec<Uuid>,
        reply: oneshot::Sender<Result<Vec<NaiveDate>, PipelineError>>,
    },
    ReprocessDay {
        date: NaiveDate,
        reply: oneshot::Sender<Result<Option<SnapshotView>, PipelineError>>,
    },
    RecordSubjective {
        date: NaiveDate,
        inputs: SubjectiveInputs,
        reply: oneshot::Sender<Result<(), PipelineError>>,
    },
    LatestSnapshot {
        include_placeholder: bool,
        reply: oneshot::Sender<Result<Option<SnapshotView>, PipelineError>>,
    },
    ScoreBreakdown {
        date: NaiveDate,
        reply: oneshot::Sender<Result<Vec<MetricBreakdown>, PipelineError>>,
    },
    PublishPlaceholder {
        date: NaiveDate,
        reply: oneshot::Sender<Result<bool, PipelineError>>,
    },
}

/// Cloneable handle to the engine worker.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    revision: watch::Receiver<u64>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        cmd: Command,
        rx: oneshot::Receiver<Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| PipelineError::Cancelled)?;
        rx.await.map_err(|_| PipelineError::Cancelled)?
    }

    /// Route fetched or delivered samples into their days and reprocess.
    pub async fn ingest_samples(
        &self,
        samples: Vec<Sample>,
    ) -> Result<Vec<NaiveDate>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::IngestSamples { samples, reply }, rx).await
    }

    pub async fn ingest_aggregates(
        &self,
        aggregates: Vec<DailyAggregate>,
    ) -> Result<Vec<NaiveDate>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::IngestAggregates { aggregates, reply }, rx)
            .await
    }

    /// Reconcile deleted sample ids across recent days.
    pub async fn delete_samples(
        &self,
        ids: Vec<Uuid>,
    ) -> Result<Vec<NaiveDate>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::DeleteSamples { ids, reply }, rx).await
    }

    pub async fn reprocess_day(
        &self,
        date: NaiveDate,
    ) -> Result<Option<SnapshotView>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::ReprocessDay { date, reply }, rx).await
    }

    pub async fn record_subjective_inputs(
        &self,
        date: NaiveDate,
        inputs: SubjectiveInputs,
    ) -> Result<(), PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::RecordSubjective { date, inputs, reply }, rx)
            .await
    }

    /// Latest snapshot, never erroring for "no data yet": `None` means no
    /// data, and a placeholder is only returned when explicitly allowed.
    pub async fn latest_snapshot(
        &self,
        include_placeholder: bool,
    ) -> Result<Option<SnapshotView>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            Command::LatestSnapshot {
                include_placeholder,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn score_breakdown(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<MetricBreakdown>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::ScoreBreakdown { date, reply }, rx).await
    }

    /// Publish a placeholder snapshot for `date` unless any snapshot
    /// (real or placeholder) already exists. Returns whether one was
    /// published now.
    pub async fn publish_placeholder(&self, date: NaiveDate) -> Result<bool, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::PublishPlaceholder { date, reply }, rx)
            .await
    }

    /// Convenience: does a real (non-placeholder) snapshot exist?
    pub async fn has_real_snapshot(&self) -> Result<bool, PipelineError> {
        Ok(self.latest_snapshot(false).await?.is_some())
    }

    /// Revision counter bumped on every snapshot-affecting write.
    pub fn revision(&self) -> watch::Receiver<u64> {
        self.revision.clone()
    }
}

/// Spawns the single-writer worker task.
pub struct Engine;

impl Engine {
    pub async fn spawn(
        store: Arc<dyn Store>,
        config: PipelineConfig,
    ) -> Result<EngineHandle, PipelineError> {
        let blob = store.load_blob(ESTIMATOR_KEY).await?;
        let estimator = WellbeingEstimator::load(&config, blob.as_deref());
        let (tx, rx) = mpsc::channel(64);
        let (revision_tx, revision_rx) = watch::channel(0u64);
        let worker = EngineWorker {
            aggregator: Aggregator::new(&config),
            baselines: BaselineEngine::new(&config),
            estimator,
            store,
            config,
            subjective: BTreeMap::new(),
            placeholder_date: None,
            revision: revision_tx,
        };
        tokio::spawn(worker.run(rx));
        Ok(EngineHandle {
            tx,
            revision: revision_rx,
        })
    }
}

struct EngineWorker {
    aggregator: Aggregator,
    baselines: BaselineEngine,
    estimator: WellbeingEstimator,
    store: Arc<dyn Store>,
    config: PipelineConfig,
    /// Per-day user-reported inputs, reapplied on every reprocess.
    subjective: BTreeMap<NaiveDate, SubjectiveInputs>,
    placeholder_date: Option<NaiveDate>,
    revision: watch::Sender<u64>,
}

impl EngineWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::IngestSamples { samples, reply } => {
                    let _ = reply.send(self.ingest_samples(samples).await);
                }
                Command::IngestAggregates { aggregates, reply } => {
                    let _ = reply.send(self.ingest_aggregates(aggregates).await);
                }
                Command::DeleteSamples { ids, reply } => {
                    let _ = reply.send(self.delete_samples(ids).await);
                }
                Command::ReprocessDay { date, reply } => {
                    let _ = reply.send(self.reprocess(date).await);
                }
                Command::RecordSubjective { date, inputs, reply } => {
                    let _ = reply.send(self.record_subjective(date, inputs).await);
                }
                Command::LatestSnapshot {
                    include_placeholder,
                    reply,
                } => {
                    let _ = reply.send(self.latest_snapshot(include_placeholder).await);
                }
                Command::ScoreBreakdown { date, reply } => {
                    let _ = reply.send(self.score_breakdown(date).await);
                }
                Command::PublishPlaceholder { date, reply } => {
                    let _ = reply.send(self.publish_placeholder(date).await);
                }
            }
        }
        tracing::debug!("engine worker stopped");
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    async fn ingest_samples(
        &mut self,
        samples: Vec<Sample>,
    ) -> Result<Vec<NaiveDate>, PipelineError> {
        let mut by_day: BTreeMap<NaiveDate, Vec<Sample>> = BTreeMap::new();
        for sample in samples {
            by_day.entry(sample.day()).or_default().push(sample);
        }
        let mut days = Vec::with_capacity(by_day.len());
        for (day, batch) in by_day {
            let mut metrics = self
                .store
                .metrics_by_date(day)
                .await?
                .unwrap_or_else(|| DailyMetrics::new(day, self.aggregator.buffer_cap()));
            self.aggregator.apply_samples(&mut metrics, &batch);
            self.store.upsert_metrics(metrics).await?;
            self.reprocess(day).await?;
            days.push(day);
        }
        Ok(days)
    }

    async fn ingest_aggregates(
        &mut self,
        aggregates: Vec<DailyAggregate>,
    ) -> Result<Vec<NaiveDate>, PipelineError> {
        let mut by_day: BTreeMap<NaiveDate, Vec<DailyAggregate>> = BTreeMap::new();
        for agg in aggregates {
            by_day.entry(agg.date).or_default().push(agg);
        }
        let mut days = Vec::with_capacity(by_day.len());
        for (day, batch) in by_day {
            let mut metrics = self
                .store
                .metrics_by_date(day)
                .await?
                .unwrap_or_else(|| DailyMetrics::new(day, self.aggregator.buffer_cap()));
            self.aggregator.apply_aggregates(&mut metrics, &batch);
            self.store.upsert_metrics(metrics).await?;
            self.reprocess(day).await?;
            days.push(day);
        }
        Ok(days)
    }

    async fn delete_samples(&mut self, ids: Vec<Uuid>) -> Result<Vec<NaiveDate>, PipelineError> {
        let today = Utc::now().date_naive();
        let records = self
            .store
            .metrics_range(today - Duration::days(DELETION_SCAN_DAYS), today)
            .await?;
        let mut changed_days = Vec::new();
        for mut metrics in records {
            if !self.aggregator.apply_deletions(&mut metrics, &ids) {
                continue;
            }
            let day = metrics.date;
            if day_is_empty(&metrics) {
                // Last samples gone: drop the record and its vector.
                self.store.delete_metrics(day).await?;
                self.store.delete_vector(day).await?;
                self.bump();
            } else {
                self.store.upsert_metrics(metrics).await?;
                self.reprocess(day).await?;
            }
            changed_days.push(day);
        }
        Ok(changed_days)
    }

    async fn record_subjective(
        &mut self,
        date: NaiveDate,
        inputs: SubjectiveInputs,
    ) -> Result<(), PipelineError> {
        self.subjective.insert(date, inputs);
        if self.store.metrics_by_date(date).await?.is_none() {
            // Subjective-only day still gets a record and a vector.
            self.store
                .upsert_metrics(DailyMetrics::new(date, self.aggregator.buffer_cap()))
                .await?;
        }
        self.reprocess(date).await?;
        Ok(())
    }

    /// Recompute a day end-to-end: summary, baselines, features, score, and
    /// the persisted feature vector. Idempotent for identical inputs.
    async fn reprocess(&mut self, date: NaiveDate) -> Result<Option<SnapshotView>, PipelineError> {
        let Some(mut metrics) = self.store.metrics_by_date(date).await? else {
            return Ok(None);
        };
        let prev = self.store.metrics_by_date(date - Duration::days(1)).await?;
        let history = self
            .store
            .metrics_range(
                date - Duration::days(self.config.baseline_window_days as i64),
                date - Duration::days(1),
            )
            .await?;

        let summary = self.aggregator.resolve(&metrics, prev.as_ref(), &history);
        copy_summary(&mut metrics, &summary);
        self.store.upsert_metrics(metrics).await?;

        let baselines = self.recompute_baselines(&history, &summary).await;
        let subjective = self.subjective.get(&date).copied().unwrap_or_default();
        let features = FeatureBundleBuilder::build(&summary, &baselines, &subjective);

        let snapshot = if self.estimator.should_train(date) {
            let snapshot = self.estimator.learn(&features, &summary.imputed);
            self.estimator.mark_trained(date);
            self.persist_estimator().await;
            snapshot
        } else {
            self.estimator.current_snapshot(&features, &summary.imputed)
        };

        let vector = FeatureVector {
            date,
            features,
            meta: FeatureMeta {
                imputed: summary.imputed,
                contributions: snapshot.contributions.clone(),
                wellbeing_score: Some(snapshot.score),
            },
        };
        self.store.upsert_vector(vector).await?;
        self.drop_superseded_placeholder(date).await?;
        self.bump();

        Ok(Some(SnapshotView {
            date,
            wellbeing_score: snapshot.score,
            contributions: snapshot.contributions,
            imputed: summary.imputed,
            features,
        }))
    }

    /// Recompute and upsert every metric's baseline over its window,
    /// including today's resolved value. A failed upsert is logged and the
    /// in-memory baseline still feeds this pass; the write is recomputed on
    /// the next reprocessing trigger.
    async fn recompute_baselines(
        &self,
        history: &[DailyMetrics],
        summary: &DailySummary,
    ) -> BTreeMap<MetricKey, Baseline> {
        let now = Utc::now();
        let mut baselines = BTreeMap::new();
        for metric in MetricKey::ALL {
            let mut values: Vec<f64> = history
                .iter()
                .filter_map(|m| metric_value(m, metric))
                .collect();
            if let Some(v) = summary_value(summary, metric) {
                values.push(v);
            }
            if let Some(baseline) = self.baselines.recompute(metric, &values, now) {
                if let Err(err) = self.store.upsert_baseline(baseline.clone()).await {
                    tracing::warn!(metric = metric.as_str(), "baseline not persisted: {err}");
                }
                baselines.insert(metric, baseline);
            }
        }
        baselines
    }

    async fn persist_estimator(&self) {
        match self.estimator.state().to_json() {
            Ok(json) => {
                if let Err(err) = self.store.save_blob(ESTIMATOR_KEY, &json).await {
                    tracing::warn!("estimator state not persisted: {err}");
                }
            }
            Err(err) => tracing::warn!("estimator state not serializable: {err}"),
        }
    }

    async fn drop_superseded_placeholder(
        &mut self,
        real_date: NaiveDate,
    ) -> Result<(), PipelineError> {
        if let Some(placeholder_date) = self.placeholder_date.take() {
            if placeholder_date != real_date {
                self.store.delete_vector(placeholder_date).await?;
            }
        }
        Ok(())
    }

    async fn publish_placeholder(&mut self, date: NaiveDate) -> Result<bool, PipelineError> {
        if self.store.latest_vector(true).await?.is_some() {
            return Ok(false);
        }
        self.store
            .upsert_vector(FeatureVector::placeholder(date))
            .await?;
        self.placeholder_date = Some(date);
        self.bump();
        tracing::info!(%date, "published placeholder snapshot");
        Ok(true)
    }

    async fn latest_snapshot(
        &self,
        include_placeholder: bool,
    ) -> Result<Option<SnapshotView>, PipelineError> {
        let Some(vector) = self.store.latest_vector(include_placeholder).await? else {
            return Ok(None);
        };
        if vector.is_placeholder() {
            return Ok(Some(SnapshotView {
                date: vector.date,
                wellbeing_score: 0.0,
                contributions: Vec::new(),
                imputed: vector.meta.imputed,
                features: vector.features,
            }));
        }
        let snapshot = self
            .estimator
            .current_snapshot(&vector.features, &vector.meta.imputed);
        Ok(Some(SnapshotView {
            date: vector.date,
            wellbeing_score: snapshot.score,
            contributions: snapshot.contributions,
            imputed: vector.meta.imputed,
            features: vector.features,
        }))
    }

    async fn score_breakdown(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<MetricBreakdown>, PipelineError> {
        let Some(vector) = self.store.vector_by_date(date).await? else {
            return Ok(Vec::new());
        };
        let metrics = self.store.metrics_by_date(date).await?;
        let snapshot = self
            .estimator
            .current_snapshot(&vector.features, &vector.meta.imputed);

        let mut breakdown = Vec::with_capacity(MetricKey::ALL.len());
        for metric in MetricKey::ALL {
            let key = feature_for(metric);
            let baseline = self.store.baseline(metric).await?;
            breakdown.push(MetricBreakdown {
                metric,
                value: metrics.as_ref().and_then(|m| metric_value(m, metric)),
                zscore: vector.features.get(key),
                baseline_median: baseline.as_ref().map(|b| b.median),
                baseline_ewma: baseline.as_ref().map(|b| b.ewma),
                contribution: snapshot
                    .contributions
                    .iter()
                    .find(|c| c.key == key)
                    .map(|c| c.share)
                    .unwrap_or(0.0),
                window_days: baseline
                    .map(|b| b.window_days)
                    .unwrap_or_else(|| self.baselines.window_for(metric)),
                imputed: imputed_for(&vector.meta.imputed, metric),
            });
        }
        Ok(breakdown)
    }
}

fn day_is_empty(metrics: &DailyMetrics) -> bool {
    let f = &metrics.flags;
    f.hrv.is_empty()
        && f.heart_rate.is_empty()
        && f.respiratory.is_empty()
        && f.sleep.is_empty()
        && f.steps.is_empty()
        && f.steps_total.is_none()
        && f.hr_mean_bpm.is_none()
        && f.resting_hr_agg_bpm.is_none()
}

fn copy_summary(metrics: &mut DailyMetrics, summary: &DailySummary) {
    metrics.hrv_ms = summary.hrv_ms;
    metrics.nocturnal_hr_bpm = summary.nocturnal_hr_bpm;
    metrics.resting_hr_bpm = summary.resting_hr_bpm;
    metrics.sleep_seconds = summary.sleep_seconds;
    metrics.sleep_debt_hours = summary.sleep_debt_hours;
    metrics.respiratory_rate = summary.respiratory_rate;
    metrics.steps = summary.steps;
}

fn metric_value(metrics: &DailyMetrics, key: MetricKey) -> Option<f64> {
    match key {
        MetricKey::Hrv => metrics.hrv_ms,
        MetricKey::NocturnalHr => metrics.nocturnal_hr_bpm,
        MetricKey::RestingHr => metrics.resting_hr_bpm,
        MetricKey::SleepDebt => metrics.sleep_debt_hours,
        MetricKey::RespiratoryRate => metrics.respiratory_rate,
        MetricKey::Steps => metrics.steps,
    }
}

fn summary_value(summary: &DailySummary, key: MetricKey) -> Option<f64> {
    match key {
        MetricKey::Hrv => summary.hrv_ms,
        MetricKey::NocturnalHr => summary.nocturnal_hr_bpm,
        MetricKey::RestingHr => summary.resting_hr_bpm,
        MetricKey::SleepDebt => summary.sleep_debt_hours,
        MetricKey::RespiratoryRate => summary.respiratory_rate,
        MetricKey::Steps => summary.steps,
    }
}

fn feature_for(metric: MetricKey) -> FeatureKey {
    match metric {
        MetricKey::Hrv => FeatureKey::ZHrv,
        MetricKey::NocturnalHr => FeatureKey::ZNocthr,
        MetricKey::RestingHr => FeatureKey::ZResthr,
        MetricKey::SleepDebt => FeatureKey::ZSleepDebt,
        MetricKey::RespiratoryRate => FeatureKey::ZRr,
        MetricKey::Steps => FeatureKey::ZSteps,
    }
}

fn imputed_for(flags: &ImputedFlags, metric: MetricKey) -> bool {
    match metric {
        MetricKey::Hrv => flags.hrv,
        MetricKey::NocturnalHr => flags.nocturnal_hr,
        MetricKey::RestingHr => flags.resting_hr,
        MetricKey::SleepDebt => flags.sleep_debt,
        MetricKey::RespiratoryRate => flags.respiratory_rate,
        MetricKey::Steps => flags.steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::SampleType;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn day() -> NaiveDate {
        Utc::now().date_naive()
    }

    fn at(date: NaiveDate, hour: u32) -> chrono::DateTime<Utc> {
        Utc.from_utc_datetime(&date.and_hms_opt(hour, 0, 0).unwrap())
    }

    fn night_samples(date: NaiveDate) -> Vec<Sample> {
        let sleep = Sample {
            id: Uuid::new_v4(),
            sample_type: SampleType::Sleep,
            start: at(date, 0),
            end: at(date, 7),
            value: 0.0,
            tag: None,
        };
        let hrv = Sample {
            id: Uuid::new_v4(),
            sample_type: SampleType::Hrv,
            start: at(date, 3),
            end: at(date, 3),
            value: 62.0,
            tag: None,
        };
        vec![sleep, hrv]
    }

    async fn engine_with_store() -> (EngineHandle, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let handle = Engine::spawn(store.clone(), PipelineConfig::default())
            .await
            .unwrap();
        (handle, store)
    }

    #[tokio::test]
    async fn ingest_produces_a_real_snapshot() {
        let (engine, _store) = engine_with_store().await;
        let days = engine.ingest_samples(night_samples(day())).await.unwrap();
        assert_eq!(days, vec![day()]);

        let snapshot = engine.latest_snapshot(false).await.unwrap().unwrap();
        assert_eq!(snapshot.date, day());
        assert!(!snapshot.imputed.placeholder);
    }

    #[tokio::test]
    async fn empty_store_returns_none_not_error() {
        let (engine, _store) = engine_with_store().await;
        assert_eq!(engine.latest_snapshot(true).await.unwrap(), None);
        assert_eq!(engine.score_breakdown(day()).await.unwrap(), Vec::new());
        assert_eq!(engine.reprocess_day(day()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn placeholder_is_published_at_most_once() {
        let (engine, _store) = engine_with_store().await;
        assert!(engine.publish_placeholder(day()).await.unwrap());
        assert!(!engine.publish_placeholder(day()).await.unwrap());

        // Excluded from the default read path.
        assert_eq!(engine.latest_snapshot(false).await.unwrap(), None);
        let snapshot = engine.latest_snapshot(true).await.unwrap().unwrap();
        assert!(snapshot.imputed.placeholder);
        assert_eq!(snapshot.wellbeing_score, 0.0);
    }

    #[tokio::test]
    async fn real_vector_supersedes_placeholder() {
        let (engine, store) = engine_with_store().await;
        let yesterday = day() - Duration::days(1);
        engine.publish_placeholder(day()).await.unwrap();
        engine
            .ingest_samples(night_samples(yesterday))
            .await
            .unwrap();

        let snapshot = engine.latest_snapshot(true).await.unwrap().unwrap();
        assert!(!snapshot.imputed.placeholder);
        assert_eq!(snapshot.date, yesterday);
        // The placeholder row is gone, not merely shadowed.
        assert_eq!(store.vector_by_date(day()).await.unwrap(), None);
        // And no new placeholder may appear while a real snapshot exists.
        assert!(!engine.publish_placeholder(day()).await.unwrap());
    }

    #[tokio::test]
    async fn reprocessing_identical_inputs_is_idempotent() {
        let (engine, store) = engine_with_store().await;
        engine.ingest_samples(night_samples(day())).await.unwrap();

        let first_vector = store.vector_by_date(day()).await.unwrap().unwrap();
        let first_metrics = store.metrics_by_date(day()).await.unwrap().unwrap();

        engine.reprocess_day(day()).await.unwrap();

        let second_vector = store.vector_by_date(day()).await.unwrap().unwrap();
        let second_metrics = store.metrics_by_date(day()).await.unwrap().unwrap();
        assert_eq!(first_vector, second_vector);
        assert_eq!(first_metrics, second_metrics);

        let first_baseline = store.baseline(MetricKey::Hrv).await.unwrap().unwrap();
        engine.reprocess_day(day()).await.unwrap();
        let second_baseline = store.baseline(MetricKey::Hrv).await.unwrap().unwrap();
        assert_eq!(first_baseline.median, second_baseline.median);
        assert_eq!(first_baseline.mad, second_baseline.mad);
        assert_eq!(first_baseline.ewma, second_baseline.ewma);
    }

    #[tokio::test]
    async fn subjective_inputs_flow_into_the_vector() {
        let (engine, store) = engine_with_store().await;
        engine
            .record_subjective_inputs(
                day(),
                SubjectiveInputs {
                    stress: Some(6.0),
                    energy: Some(3.0),
                    sleep_quality: Some(5.0),
                    sentiment: Some(0.2),
                },
            )
            .await
            .unwrap();

        let vector = store.vector_by_date(day()).await.unwrap().unwrap();
        assert_eq!(vector.features.subj_stress, 6.0);
        assert_eq!(vector.features.sentiment, 0.2);
        assert!(!vector.is_placeholder());
    }

    #[tokio::test]
    async fn score_breakdown_reports_all_metrics() {
        let (engine, _store) = engine_with_store().await;
        engine.ingest_samples(night_samples(day())).await.unwrap();

        let breakdown = engine.score_breakdown(day()).await.unwrap();
        assert_eq!(breakdown.len(), MetricKey::ALL.len());
        let hrv = breakdown
            .iter()
            .find(|b| b.metric == MetricKey::Hrv)
            .unwrap();
        assert_eq!(hrv.value, Some(62.0));
        assert_eq!(hrv.window_days, 30);
        assert!(hrv.baseline_median.is_some());
    }

    #[tokio::test]
    async fn deleting_last_samples_drops_the_day() {
        let (engine, store) = engine_with_store().await;
        let samples = night_samples(day());
        let ids: Vec<Uuid> = samples.iter().map(|s| s.id).collect();
        engine.ingest_samples(samples).await.unwrap();
        assert!(store.metrics_by_date(day()).await.unwrap().is_some());

        let changed = engine.delete_samples(ids).await.unwrap();
        assert_eq!(changed, vec![day()]);
        assert_eq!(store.metrics_by_date(day()).await.unwrap(), None);
        assert_eq!(store.vector_by_date(day()).await.unwrap(), None);

        // Deleting again is a clean no-op.
        let changed = engine.delete_samples(vec![Uuid::new_v4()]).await.unwrap();
        assert!(changed.is_empty());
    }

    #[tokio::test]
    async fn revision_bumps_on_writes() {
        let (engine, _store) = engine_with_store().await;
        let rev = engine.revision();
        let before = *rev.borrow();
        engine.ingest_samples(night_samples(day())).await.unwrap();
        assert!(*rev.borrow() > before);
    }
}
