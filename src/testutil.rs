//! Scripted test doubles for the external collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::PipelineError;
use crate::source::{AccessStatus, DateRange, HealthSource, SampleDelivery};
use crate::types::{DailyAggregate, Sample, SampleType};

/// Route `tracing` output through the test harness. Honors `RUST_LOG`;
/// repeated calls are a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One scripted reply to a `fetch_samples` call.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Samples(Vec<Sample>),
    Empty,
    /// Never completes; the caller's deadline decides.
    Hang,
    Fail(String),
    Unavailable,
}

/// Health source replaying per-type scripts in order. Once a type's script is
/// exhausted, further fetches return empty.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<SampleType, VecDeque<ScriptedResponse>>>,
    aggregates: Mutex<HashMap<SampleType, Vec<DailyAggregate>>>,
    access: Mutex<HashMap<SampleType, AccessStatus>>,
    deliveries: Mutex<HashMap<SampleType, mpsc::Sender<SampleDelivery>>>,
    fetch_log: Mutex<Vec<(SampleType, DateRange)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, ty: SampleType, responses: Vec<ScriptedResponse>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(ty, responses.into());
    }

    pub fn script_all(&self, responses: Vec<ScriptedResponse>) {
        for ty in SampleType::ALL {
            self.script(ty, responses.clone());
        }
    }

    pub fn set_aggregates(&self, ty: SampleType, aggregates: Vec<DailyAggregate>) {
        self.aggregates.lock().unwrap().insert(ty, aggregates);
    }

    pub fn set_access(&self, ty: SampleType, status: AccessStatus) {
        self.access.lock().unwrap().insert(ty, status);
    }

    /// Push a delivery into an active observation stream, if any.
    pub async fn deliver(&self, delivery: SampleDelivery) {
        let sender = self
            .deliveries
            .lock()
            .unwrap()
            .get(&delivery.sample_type)
            .cloned();
        if let Some(tx) = sender {
            let _ = tx.send(delivery).await;
        }
    }

    pub fn fetches(&self) -> Vec<(SampleType, DateRange)> {
        self.fetch_log.lock().unwrap().clone()
    }

    fn next_response(&self, ty: SampleType) -> ScriptedResponse {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&ty)
            .and_then(|q| q.pop_front())
            .unwrap_or(ScriptedResponse::Empty)
    }
}

#[async_trait]
impl HealthSource for ScriptedSource {
    async fn fetch_samples(
        &self,
        ty: SampleType,
        range: DateRange,
    ) -> Result<Vec<Sample>, PipelineError> {
        self.fetch_log.lock().unwrap().push((ty, range));
        match self.next_response(ty) {
            ScriptedResponse::Samples(samples) => Ok(samples
                .into_iter()
                .filter(|s| range.contains(s.day()))
                .collect()),
            ScriptedResponse::Empty => Ok(Vec::new()),
            ScriptedResponse::Hang => std::future::pending().await,
            ScriptedResponse::Fail(msg) => Err(PipelineError::FetchError(msg)),
            ScriptedResponse::Unavailable => {
                Err(PipelineError::TransientUnavailable("store locked".into()))
            }
        }
    }

    async fn fetch_daily_aggregates(
        &self,
        ty: SampleType,
        range: DateRange,
    ) -> Result<Vec<DailyAggregate>, PipelineError> {
        Ok(self
            .aggregates
            .lock()
            .unwrap()
            .get(&ty)
            .map(|all| {
                all.iter()
                    .filter(|a| range.contains(a.date))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn observe(
        &self,
        ty: SampleType,
    ) -> Result<mpsc::Receiver<SampleDelivery>, PipelineError> {
        let (tx, rx) = mpsc::channel(32);
        self.deliveries.lock().unwrap().insert(ty, tx);
        Ok(rx)
    }

    async fn enable_background_delivery(
        &self,
        _types: &[SampleType],
    ) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn request_authorization(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn probe_read_access(
        &self,
        types: &[SampleType],
    ) -> Result<HashMap<SampleType, AccessStatus>, PipelineError> {
        let access = self.access.lock().unwrap();
        Ok(types
            .iter()
            .map(|ty| (*ty, access.get(ty).copied().unwrap_or(AccessStatus::Authorized)))
            .collect())
    }
}
