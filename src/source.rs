//! Health-data source seam
//!
//! The platform health API is an external collaborator; the pipeline only
//! depends on this trait. Implementations must keep "temporarily
//! inaccessible" distinct from "denied" and from generic errors.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::types::{DailyAggregate, Sample, SampleType};

/// Inclusive calendar-day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Range ending at `anchor` and reaching `days` back (inclusive).
    pub fn days_back(anchor: NaiveDate, days: i64) -> Self {
        Self {
            start: anchor - Duration::days(days.max(1) - 1),
            end: anchor,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Per-type read access as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    Authorized,
    Denied,
    Pending,
    /// Store exists but cannot be read right now (e.g. device locked).
    Unavailable,
    Error,
}

/// One delivery from a standing observation query.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleDelivery {
    pub sample_type: SampleType,
    pub added: Vec<Sample>,
    pub deleted: Vec<Uuid>,
}

/// External health-data collaborator.
#[async_trait]
pub trait HealthSource: Send + Sync {
    /// Fetch raw samples of one type over a day range.
    async fn fetch_samples(
        &self,
        ty: SampleType,
        range: DateRange,
    ) -> Result<Vec<Sample>, PipelineError>;

    /// Fetch per-day aggregates for high-volume types (steps, heart rate).
    async fn fetch_daily_aggregates(
        &self,
        ty: SampleType,
        range: DateRange,
    ) -> Result<Vec<DailyAggregate>, PipelineError>;

    /// Register a standing subscription delivering added/deleted samples.
    async fn observe(
        &self,
        ty: SampleType,
    ) -> Result<mpsc::Receiver<SampleDelivery>, PipelineError>;

    async fn enable_background_delivery(
        &self,
        types: &[SampleType],
    ) -> Result<(), PipelineError>;

    async fn request_authorization(&self) -> Result<(), PipelineError>;

    async fn probe_read_access(
        &self,
        types: &[SampleType],
    ) -> Result<HashMap<SampleType, AccessStatus>, PipelineError>;
}
