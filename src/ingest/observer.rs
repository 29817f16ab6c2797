//! Live observation
//!
//! One task per sample type drains the source's standing delivery stream.
//! Bursts are debounced: deliveries arriving within the window are merged and
//! applied as one batch, last write wins.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::engine::EngineHandle;
use crate::source::{HealthSource, SampleDelivery};
use crate::types::SampleType;

pub(super) async fn observe_type(
    engine: EngineHandle,
    source: Arc<dyn HealthSource>,
    ty: SampleType,
    debounce: Duration,
    cancel: CancellationToken,
) {
    let mut rx = match source.observe(ty).await {
        Ok(rx) => rx,
        Err(err) => {
            tracing::warn!(ty = ty.as_str(), "observation unavailable: {err}");
            return;
        }
    };
    tracing::debug!(ty = ty.as_str(), "observing");

    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => return,
            delivery = rx.recv() => match delivery {
                Some(delivery) => delivery,
                None => {
                    tracing::debug!(ty = ty.as_str(), "observation stream closed");
                    return;
                }
            },
        };

        let mut batch = first;
        let window = tokio::time::sleep(debounce);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = &mut window => break,
                delivery = rx.recv() => match delivery {
                    Some(more) => merge(&mut batch, more),
                    None => break,
                },
            }
        }

        apply(&engine, ty, batch).await;
    }
}

fn merge(batch: &mut SampleDelivery, more: SampleDelivery) {
    batch.added.extend(more.added);
    batch.deleted.extend(more.deleted);
}

async fn apply(engine: &EngineHandle, ty: SampleType, batch: SampleDelivery) {
    if !batch.added.is_empty() {
        if let Err(err) = engine.ingest_samples(batch.added).await {
            tracing::warn!(ty = ty.as_str(), "live ingest failed: {err}");
        }
    }
    if !batch.deleted.is_empty() {
        if let Err(err) = engine.delete_samples(batch.deleted).await {
            tracing::warn!(ty = ty.as_str(), "deletion reconcile failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::engine::Engine;
    use crate::ingest::tests::sample;
    use crate::store::{MemoryStore, Store};
    use crate::testutil::ScriptedSource;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    async fn fixture() -> (EngineHandle, Arc<ScriptedSource>, Arc<MemoryStore>) {
        crate::testutil::init_tracing();
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::spawn(store.clone(), PipelineConfig::default())
            .await
            .unwrap();
        (engine, Arc::new(ScriptedSource::new()), store)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_deliveries_applies_as_one_batch() {
        let (engine, source, store) = fixture().await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(observe_type(
            engine.clone(),
            source.clone(),
            SampleType::Hrv,
            Duration::from_millis(300),
            cancel.clone(),
        ));
        tokio::task::yield_now().await;

        let today = Utc::now().date_naive();
        for value in [48.0, 52.0, 56.0] {
            source
                .deliver(SampleDelivery {
                    sample_type: SampleType::Hrv,
                    added: vec![sample(SampleType::Hrv, today, 3, value)],
                    deleted: vec![],
                })
                .await;
        }
        // Cross the debounce window so the merged batch is applied.
        tokio::time::sleep(Duration::from_secs(1)).await;

        let metrics = store.metrics_by_date(today).await.unwrap().unwrap();
        assert_eq!(metrics.flags.hrv.len(), 3);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_delivery_reconciles_the_day() {
        let (engine, source, store) = fixture().await;
        let today = Utc::now().date_naive();
        let s = sample(SampleType::Hrv, today, 3, 50.0);
        let id = s.id;
        engine.ingest_samples(vec![s]).await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(observe_type(
            engine.clone(),
            source.clone(),
            SampleType::Hrv,
            Duration::from_millis(300),
            cancel.clone(),
        ));
        tokio::task::yield_now().await;

        source
            .deliver(SampleDelivery {
                sample_type: SampleType::Hrv,
                added: vec![],
                deleted: vec![id],
            })
            .await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(store.metrics_by_date(today).await.unwrap(), None);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_ends_the_task() {
        let (engine, source, _store) = fixture().await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(observe_type(
            engine,
            source.clone(),
            SampleType::Steps,
            Duration::from_millis(300),
            cancel,
        ));
        tokio::task::yield_now().await;

        // Replacing the observation drops the previous sender.
        let _rx = source.observe(SampleType::Steps).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_deleted_ids_are_a_no_op() {
        let (engine, source, store) = fixture().await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(observe_type(
            engine,
            source.clone(),
            SampleType::Sleep,
            Duration::from_millis(300),
            cancel.clone(),
        ));
        tokio::task::yield_now().await;

        source
            .deliver(SampleDelivery {
                sample_type: SampleType::Sleep,
                added: vec![],
                deleted: vec![Uuid::new_v4()],
            })
            .await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store
            .metrics_by_date(Utc::now().date_naive())
            .await
            .unwrap()
            .is_none());

        cancel.cancel();
        task.await.unwrap();
    }
}
