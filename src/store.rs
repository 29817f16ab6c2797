//! Durable store seam and in-memory implementation
//!
//! Typed, day-keyed CRUD for the pipeline's records plus schema-versioned
//! key-value persistence for the two state blobs. [`MemoryStore`] backs the
//! test suite and any host that brings its own durability.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;

use crate::error::PipelineError;
use crate::types::{Baseline, DailyMetrics, FeatureVector, MetricKey};

/// KV key of the persisted backfill checkpoint.
pub const PROGRESS_KEY: &str = "backfill_progress";
/// KV key of the persisted estimator weights.
pub const ESTIMATOR_KEY: &str = "estimator_state";

/// Durable object store collaborator.
#[async_trait]
pub trait Store: Send + Sync {
    async fn metrics_by_date(
        &self,
        date: NaiveDate,
    ) -> Result<Option<DailyMetrics>, PipelineError>;

    /// Ascending, inclusive day range.
    async fn metrics_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyMetrics>, PipelineError>;

    async fn upsert_metrics(&self, record: DailyMetrics) -> Result<(), PipelineError>;

    async fn delete_metrics(&self, date: NaiveDate) -> Result<(), PipelineError>;

    async fn baseline(&self, metric: MetricKey) -> Result<Option<Baseline>, PipelineError>;

    async fn upsert_baseline(&self, baseline: Baseline) -> Result<(), PipelineError>;

    async fn vector_by_date(
        &self,
        date: NaiveDate,
    ) -> Result<Option<FeatureVector>, PipelineError>;

    /// Latest non-placeholder vector; with `include_placeholder` the latest
    /// placeholder is returned only when no real vector exists at all.
    async fn latest_vector(
        &self,
        include_placeholder: bool,
    ) -> Result<Option<FeatureVector>, PipelineError>;

    async fn upsert_vector(&self, vector: FeatureVector) -> Result<(), PipelineError>;

    async fn delete_vector(&self, date: NaiveDate) -> Result<(), PipelineError>;

    /// Load a persisted JSON blob by key.
    async fn load_blob(&self, key: &str) -> Result<Option<String>, PipelineError>;

    /// Atomically persist a JSON blob under a key.
    async fn save_blob(&self, key: &str, json: &str) -> Result<(), PipelineError>;
}

#[derive(Default)]
struct MemoryInner {
    metrics: BTreeMap<NaiveDate, DailyMetrics>,
    baselines: BTreeMap<MetricKey, Baseline>,
    vectors: BTreeMap<NaiveDate, FeatureVector>,
    blobs: BTreeMap<String, String>,
}

/// In-memory [`Store`] used by the test suite.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn metrics_by_date(
        &self,
        date: NaiveDate,
    ) -> Result<Option<DailyMetrics>, PipelineError> {
        Ok(self.inner.lock().await.metrics.get(&date).cloned())
    }

    async fn metrics_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyMetrics>, PipelineError> {
        Ok(self
            .inner
            .lock()
            .await
            .metrics
            .range(from..=to)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn upsert_metrics(&self, record: DailyMetrics) -> Result<(), PipelineError> {
        self.inner.lock().await.metrics.insert(record.date, record);
        Ok(())
    }

    async fn delete_metrics(&self, date: NaiveDate) -> Result<(), PipelineError> {
        self.inner.lock().await.metrics.remove(&date);
        Ok(())
    }

    async fn baseline(&self, metric: MetricKey) -> Result<Option<Baseline>, PipelineError> {
        Ok(self.inner.lock().await.baselines.get(&metric).cloned())
    }

    async fn upsert_baseline(&self, baseline: Baseline) -> Result<(), PipelineError> {
        self.inner
            .lock()
            .await
            .baselines
            .insert(baseline.metric, baseline);
        Ok(())
    }

    async fn vector_by_date(
        &self,
        date: NaiveDate,
    ) -> Result<Option<FeatureVector>, PipelineError> {
        Ok(self.inner.lock().await.vectors.get(&date).cloned())
    }

    async fn latest_vector(
        &self,
        include_placeholder: bool,
    ) -> Result<Option<FeatureVector>, PipelineError> {
        let inner = self.inner.lock().await;
        let latest_real = inner
            .vectors
            .values()
            .rev()
            .find(|v| !v.is_placeholder())
            .cloned();
        if latest_real.is_some() || !include_placeholder {
            return Ok(latest_real);
        }
        Ok(inner.vectors.values().next_back().cloned())
    }

    async fn upsert_vector(&self, vector: FeatureVector) -> Result<(), PipelineError> {
        self.inner.lock().await.vectors.insert(vector.date, vector);
        Ok(())
    }

    async fn delete_vector(&self, date: NaiveDate) -> Result<(), PipelineError> {
        self.inner.lock().await.vectors.remove(&date);
        Ok(())
    }

    async fn load_blob(&self, key: &str) -> Result<Option<String>, PipelineError> {
        Ok(self.inner.lock().await.blobs.get(key).cloned())
    }

    async fn save_blob(&self, key: &str, json: &str) -> Result<(), PipelineError> {
        self.inner
            .lock()
            .await
            .blobs
            .insert(key.to_string(), json.to_string());
        Ok(())
    }
}
