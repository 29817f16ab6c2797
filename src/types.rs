//! Core types for the wellspring pipeline
//!
//! This module defines the data that flows through the pipeline: raw samples,
//! the per-day record with its bounded sample buffers, resolved daily
//! summaries with imputation flags, baselines, the fixed-schema feature
//! vector, and the persisted backfill checkpoint.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

/// Schema version of the persisted [`BackfillProgress`] blob.
pub const PROGRESS_SCHEMA_VERSION: u32 = 1;

/// Source types the pipeline ingests from the health store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SampleType {
    Hrv,
    HeartRate,
    RespiratoryRate,
    Sleep,
    Steps,
}

impl SampleType {
    pub const ALL: [SampleType; 5] = [
        SampleType::Hrv,
        SampleType::HeartRate,
        SampleType::RespiratoryRate,
        SampleType::Sleep,
        SampleType::Steps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SampleType::Hrv => "hrv",
            SampleType::HeartRate => "heart_rate",
            SampleType::RespiratoryRate => "respiratory_rate",
            SampleType::Sleep => "sleep",
            SampleType::Steps => "steps",
        }
    }

    /// High-volume types are also queryable via daily aggregates instead of
    /// raw samples.
    pub fn is_high_volume(&self) -> bool {
        matches!(self, SampleType::HeartRate | SampleType::Steps)
    }
}

/// Tag distinguishing ordinary from resting heart-rate samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartRateTag {
    Normal,
    Resting,
}

/// A raw sample as delivered by the health source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Source-assigned identity; unique within a day's buffer.
    pub id: Uuid,
    pub sample_type: SampleType,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// ms for HRV, bpm for heart rate, breaths/min for respiration,
    /// count for step buckets; unused for sleep segments.
    pub value: f64,
    pub tag: Option<HeartRateTag>,
}

impl Sample {
    /// Calendar day this sample belongs to (store-local day key).
    pub fn day(&self) -> NaiveDate {
        self.start.date_naive()
    }
}

/// Per-day aggregate for high-volume types, fetched in place of raw samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub sample_type: SampleType,
    pub value: f64,
}

/// Items storable in a bounded buffer, keyed by source-assigned id.
pub trait Keyed {
    fn key(&self) -> Uuid;
}

/// Append-only bounded buffer: oldest entries are trimmed once capacity is
/// exceeded, identity is unique, and deleting an absent id is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedBuffer<T> {
    items: VecDeque<T>,
    cap: usize,
}

impl<T: Keyed> BoundedBuffer<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(cap.min(64)),
            cap,
        }
    }

    /// Append an item unless its id is already present, then trim oldest.
    pub fn push(&mut self, item: T) {
        if self.items.iter().any(|i| i.key() == item.key()) {
            return;
        }
        self.items.push_back(item);
        while self.items.len() > self.cap {
            self.items.pop_front();
        }
    }

    /// Remove by id. Returns whether anything was removed; absent ids are a
    /// no-op.
    pub fn remove(&mut self, id: Uuid) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.key() != id);
        self.items.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A timestamped scalar sample held in a day buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub value: f64,
}

impl Keyed for SamplePoint {
    fn key(&self) -> Uuid {
        self.id
    }
}

/// A heart-rate sample with its resting/normal tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedPoint {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub value: f64,
    pub tag: HeartRateTag,
}

impl Keyed for TaggedPoint {
    fn key(&self) -> Uuid {
        self.id
    }
}

/// A sleep interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepSegment {
    pub id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Keyed for SleepSegment {
    fn key(&self) -> Uuid {
        self.id
    }
}

/// A step-count bucket covering a short interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepBucket {
    pub id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub count: f64,
}

impl Keyed for StepBucket {
    fn key(&self) -> Uuid {
        self.id
    }
}

/// Per-signal sample buffers plus aggregated fallback scalars for a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyFlags {
    pub hrv: BoundedBuffer<SamplePoint>,
    pub heart_rate: BoundedBuffer<TaggedPoint>,
    pub respiratory: BoundedBuffer<SamplePoint>,
    pub sleep: BoundedBuffer<SleepSegment>,
    pub steps: BoundedBuffer<StepBucket>,
    /// Aggregated fallbacks used when raw samples are absent.
    pub steps_total: Option<f64>,
    pub hr_mean_bpm: Option<f64>,
    pub resting_hr_agg_bpm: Option<f64>,
}

impl DailyFlags {
    pub fn new(cap: usize) -> Self {
        Self {
            hrv: BoundedBuffer::new(cap),
            heart_rate: BoundedBuffer::new(cap),
            respiratory: BoundedBuffer::new(cap),
            sleep: BoundedBuffer::new(cap),
            steps: BoundedBuffer::new(cap),
            steps_total: None,
            hr_mean_bpm: None,
            resting_hr_agg_bpm: None,
        }
    }
}

/// One record per calendar day. Created lazily on the first sample for that
/// day and mutated only by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub date: NaiveDate,
    pub hrv_ms: Option<f64>,
    pub nocturnal_hr_bpm: Option<f64>,
    pub resting_hr_bpm: Option<f64>,
    pub sleep_seconds: Option<f64>,
    pub sleep_debt_hours: Option<f64>,
    pub respiratory_rate: Option<f64>,
    pub steps: Option<f64>,
    pub flags: DailyFlags,
}

impl DailyMetrics {
    pub fn new(date: NaiveDate, buffer_cap: usize) -> Self {
        Self {
            date,
            hrv_ms: None,
            nocturnal_hr_bpm: None,
            resting_hr_bpm: None,
            sleep_seconds: None,
            sleep_debt_hours: None,
            respiratory_rate: None,
            steps: None,
            flags: DailyFlags::new(buffer_cap),
        }
    }
}

/// Which resolved values were carried over or invented rather than measured.
///
/// `placeholder` is the reserved flag marking a vector that was published
/// before any real data existed; downstream consumers must never mistake a
/// placeholder for a measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImputedFlags {
    pub hrv: bool,
    pub nocturnal_hr: bool,
    pub resting_hr: bool,
    pub sleep: bool,
    pub sleep_debt: bool,
    pub respiratory_rate: bool,
    pub steps: bool,
    pub placeholder: bool,
}

impl ImputedFlags {
    /// True when any physiological value was imputed or the vector is a
    /// placeholder ("sparse data" mode for the coverage gate).
    pub fn any(&self) -> bool {
        self.hrv
            || self.nocturnal_hr
            || self.resting_hr
            || self.sleep
            || self.sleep_debt
            || self.respiratory_rate
            || self.steps
            || self.placeholder
    }
}

/// Resolved per-day values with explicit imputation flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub hrv_ms: Option<f64>,
    pub nocturnal_hr_bpm: Option<f64>,
    pub resting_hr_bpm: Option<f64>,
    pub sleep_seconds: Option<f64>,
    pub sleep_debt_hours: Option<f64>,
    pub respiratory_rate: Option<f64>,
    pub steps: Option<f64>,
    pub imputed: ImputedFlags,
}

/// Metric keys tracked by the baseline engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    Hrv,
    NocturnalHr,
    RestingHr,
    SleepDebt,
    RespiratoryRate,
    Steps,
}

impl MetricKey {
    pub const ALL: [MetricKey; 6] = [
        MetricKey::Hrv,
        MetricKey::NocturnalHr,
        MetricKey::RestingHr,
        MetricKey::SleepDebt,
        MetricKey::RespiratoryRate,
        MetricKey::Steps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKey::Hrv => "hrv",
            MetricKey::NocturnalHr => "nocturnal_hr",
            MetricKey::RestingHr => "resting_hr",
            MetricKey::SleepDebt => "sleep_debt",
            MetricKey::RespiratoryRate => "respiratory_rate",
            MetricKey::Steps => "steps",
        }
    }
}

/// Rolling robust statistics for one metric, upserted on every recompute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub metric: MetricKey,
    pub window_days: usize,
    pub median: f64,
    pub mad: f64,
    pub ewma: f64,
    pub updated_at: DateTime<Utc>,
}

/// The ten canonical feature keys.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKey {
    ZHrv,
    ZNocthr,
    ZResthr,
    ZSleepDebt,
    ZRr,
    ZSteps,
    SubjStress,
    SubjEnergy,
    SubjSleepQuality,
    Sentiment,
}

impl FeatureKey {
    pub const ALL: [FeatureKey; 10] = [
        FeatureKey::ZHrv,
        FeatureKey::ZNocthr,
        FeatureKey::ZResthr,
        FeatureKey::ZSleepDebt,
        FeatureKey::ZRr,
        FeatureKey::ZSteps,
        FeatureKey::SubjStress,
        FeatureKey::SubjEnergy,
        FeatureKey::SubjSleepQuality,
        FeatureKey::Sentiment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKey::ZHrv => "z_hrv",
            FeatureKey::ZNocthr => "z_nocthr",
            FeatureKey::ZResthr => "z_resthr",
            FeatureKey::ZSleepDebt => "z_sleep_debt",
            FeatureKey::ZRr => "z_rr",
            FeatureKey::ZSteps => "z_steps",
            FeatureKey::SubjStress => "subj_stress",
            FeatureKey::SubjEnergy => "subj_energy",
            FeatureKey::SubjSleepQuality => "subj_sleep_quality",
            FeatureKey::Sentiment => "sentiment",
        }
    }

    /// Z-score features, as opposed to subjective/sentiment values.
    pub fn is_zscore(&self) -> bool {
        matches!(
            self,
            FeatureKey::ZHrv
                | FeatureKey::ZNocthr
                | FeatureKey::ZResthr
                | FeatureKey::ZSleepDebt
                | FeatureKey::ZRr
                | FeatureKey::ZSteps
        )
    }
}

/// Complete, fixed-shape feature values. Every downstream consumer sees all
/// ten keys regardless of data sparsity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub z_hrv: f64,
    pub z_nocthr: f64,
    pub z_resthr: f64,
    pub z_sleep_debt: f64,
    pub z_rr: f64,
    pub z_steps: f64,
    pub subj_stress: f64,
    pub subj_energy: f64,
    pub subj_sleep_quality: f64,
    pub sentiment: f64,
}

impl FeatureSet {
    pub fn get(&self, key: FeatureKey) -> f64 {
        match key {
            FeatureKey::ZHrv => self.z_hrv,
            FeatureKey::ZNocthr => self.z_nocthr,
            FeatureKey::ZResthr => self.z_resthr,
            FeatureKey::ZSleepDebt => self.z_sleep_debt,
            FeatureKey::ZRr => self.z_rr,
            FeatureKey::ZSteps => self.z_steps,
            FeatureKey::SubjStress => self.subj_stress,
            FeatureKey::SubjEnergy => self.subj_energy,
            FeatureKey::SubjSleepQuality => self.subj_sleep_quality,
            FeatureKey::Sentiment => self.sentiment,
        }
    }

    pub fn set(&mut self, key: FeatureKey, value: f64) {
        match key {
            FeatureKey::ZHrv => self.z_hrv = value,
            FeatureKey::ZNocthr => self.z_nocthr = value,
            FeatureKey::ZResthr => self.z_resthr = value,
            FeatureKey::ZSleepDebt => self.z_sleep_debt = value,
            FeatureKey::ZRr => self.z_rr = value,
            FeatureKey::ZSteps => self.z_steps = value,
            FeatureKey::SubjStress => self.subj_stress = value,
            FeatureKey::SubjEnergy => self.subj_energy = value,
            FeatureKey::SubjSleepQuality => self.subj_sleep_quality = value,
            FeatureKey::Sentiment => self.sentiment = value,
        }
    }
}

/// Signed share of one feature in the wellbeing score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub key: FeatureKey,
    pub share: f64,
}

/// Metadata carried alongside the feature values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureMeta {
    pub imputed: ImputedFlags,
    pub contributions: Vec<Contribution>,
    pub wellbeing_score: Option<f64>,
}

/// One feature vector per day. May exist as a placeholder before any scalar
/// is known; [`FeatureVector::is_placeholder`] must be checked before treating
/// it as a measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub date: NaiveDate,
    pub features: FeatureSet,
    pub meta: FeatureMeta,
}

impl FeatureVector {
    pub fn is_placeholder(&self) -> bool {
        self.meta.imputed.placeholder
    }

    /// The placeholder published when no real data exists yet: all keys zero,
    /// reserved flag set.
    pub fn placeholder(date: NaiveDate) -> Self {
        Self {
            date,
            features: FeatureSet::default(),
            meta: FeatureMeta {
                imputed: ImputedFlags {
                    placeholder: true,
                    ..ImputedFlags::default()
                },
                contributions: Vec::new(),
                wellbeing_score: None,
            },
        }
    }
}

/// Derived read model consumed by coaching/UI; never stored directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotView {
    pub date: NaiveDate,
    pub wellbeing_score: f64,
    pub contributions: Vec<Contribution>,
    pub imputed: ImputedFlags,
    pub features: FeatureSet,
}

/// Per-metric scoring detail for the breakdown read API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBreakdown {
    pub metric: MetricKey,
    pub value: Option<f64>,
    pub zscore: f64,
    pub baseline_median: Option<f64>,
    pub baseline_ewma: Option<f64>,
    pub contribution: f64,
    pub window_days: usize,
    pub imputed: bool,
}

/// Per-source-type backfill checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceProgress {
    pub warm_start_done: bool,
    pub full_backfill_done: bool,
    /// Earliest day fully processed; only ever moves backward in time.
    pub earliest_processed: Option<NaiveDate>,
}

/// Persisted, schema-versioned backfill checkpoint (one per install).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillProgress {
    pub schema_version: u32,
    pub sources: BTreeMap<SampleType, SourceProgress>,
}

impl Default for BackfillProgress {
    fn default() -> Self {
        Self {
            schema_version: PROGRESS_SCHEMA_VERSION,
            sources: BTreeMap::new(),
        }
    }
}

impl BackfillProgress {
    pub fn source(&self, ty: SampleType) -> SourceProgress {
        self.sources.get(&ty).cloned().unwrap_or_default()
    }

    fn source_mut(&mut self, ty: SampleType) -> &mut SourceProgress {
        self.sources.entry(ty).or_default()
    }

    /// Record that data back to `earliest` has been durably processed.
    /// The checkpoint only moves backward; a later (younger) date is ignored.
    pub fn record_processed(&mut self, ty: SampleType, earliest: chrono::NaiveDate) {
        let entry = self.source_mut(ty);
        match entry.earliest_processed {
            Some(current) if earliest >= current => {}
            _ => entry.earliest_processed = Some(earliest),
        }
    }

    pub fn mark_warm_start(&mut self, ty: SampleType) {
        self.source_mut(ty).warm_start_done = true;
    }

    pub fn mark_full_backfill(&mut self, ty: SampleType) {
        self.source_mut(ty).full_backfill_done = true;
    }

    /// Clear a type's checkpoint after permission revocation so a future
    /// re-grant starts clean.
    pub fn clear(&mut self, ty: SampleType) {
        self.sources.remove(&ty);
    }

    /// Parse a persisted blob, rejecting unexpected schema versions so a
    /// partially-understood checkpoint is never trusted.
    pub fn from_json(json: &str) -> Result<Self, crate::error::PipelineError> {
        let parsed: Self = serde_json::from_str(json)?;
        if parsed.schema_version != PROGRESS_SCHEMA_VERSION {
            return Err(crate::error::PipelineError::SchemaVersion {
                found: parsed.schema_version,
                expected: PROGRESS_SCHEMA_VERSION,
            });
        }
        Ok(parsed)
    }

    pub fn to_json(&self) -> Result<String, crate::error::PipelineError> {
        Ok(serde_json::to_string(self)?)
    }
}
