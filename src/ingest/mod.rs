//! Sample ingestion orchestration
//!
//! Drives everything between the platform health store and the engine:
//! authorization, the bootstrap fetch with its retry ladder, the placeholder
//! watchdog, warm-start and full historical backfill, and the standing
//! observation streams. Every background task hangs off a cancellation token
//! so shutdown and re-scheduling are prompt and clean.

mod backfill;
mod bootstrap;
mod observer;

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::engine::EngineHandle;
use crate::error::PipelineError;
use crate::source::HealthSource;
use crate::store::Store;
use crate::types::SampleType;

use backfill::Backfill;
use bootstrap::Bootstrap;

struct TaskGuard {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the ingestion background tasks for one engine.
pub struct IngestController {
    engine: EngineHandle,
    source: Arc<dyn HealthSource>,
    store: Arc<dyn Store>,
    config: Arc<PipelineConfig>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    backfill: Option<TaskGuard>,
}

impl IngestController {
    pub fn new(
        engine: EngineHandle,
        source: Arc<dyn HealthSource>,
        store: Arc<dyn Store>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            engine,
            source,
            store,
            config: Arc::new(config),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            backfill: None,
        }
    }

    /// Request authorization and launch the ingestion tasks: watchdog,
    /// bootstrap, per-type observers, and the backfill sequence.
    ///
    /// Authorization failure aborts startup; everything downstream would
    /// only produce denials.
    pub async fn start(&mut self) -> Result<(), PipelineError> {
        self.source.request_authorization().await?;
        if let Err(err) = self
            .source
            .enable_background_delivery(&SampleType::ALL)
            .await
        {
            tracing::warn!("background delivery not enabled: {err}");
        }

        self.tasks.push(tokio::spawn(watchdog(
            self.engine.clone(),
            self.config.watchdog_deadline,
            self.cancel.child_token(),
        )));

        let bootstrap = Bootstrap {
            engine: self.engine.clone(),
            source: self.source.clone(),
            config: self.config.clone(),
            cancel: self.cancel.child_token(),
        };
        self.tasks.push(tokio::spawn(bootstrap.run()));

        for ty in SampleType::ALL {
            self.tasks.push(tokio::spawn(observer::observe_type(
                self.engine.clone(),
                self.source.clone(),
                ty,
                self.config.change_debounce,
                self.cancel.child_token(),
            )));
        }

        self.schedule_backfill();
        Ok(())
    }

    /// Start (or restart) the warm-start and full-backfill sequence. A
    /// running backfill is cancelled first; it stops at its next checkpoint,
    /// so progress already persisted is never lost.
    pub fn schedule_backfill(&mut self) {
        if let Some(previous) = self.backfill.take() {
            previous.cancel.cancel();
        }
        let cancel = self.cancel.child_token();
        let task = Backfill {
            engine: self.engine.clone(),
            source: self.source.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            cancel: cancel.clone(),
        };
        self.backfill = Some(TaskGuard {
            cancel,
            handle: tokio::spawn(task.run()),
        });
    }

    /// Drop the persisted backfill checkpoint and start the sequence over
    /// from scratch.
    pub async fn reset_progress(&mut self) -> Result<(), PipelineError> {
        if let Some(previous) = self.backfill.take() {
            previous.cancel.cancel();
            let _ = previous.handle.await;
        }
        let clean = crate::types::BackfillProgress::default().to_json()?;
        self.store
            .save_blob(crate::store::PROGRESS_KEY, &clean)
            .await?;
        tracing::info!("backfill checkpoint reset");
        self.schedule_backfill();
        Ok(())
    }

    /// Cancel every background task and wait for them to finish.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(guard) = self.backfill.take() {
            let _ = guard.handle.await;
        }
        for handle in self.tasks.drain(..) {
            let _ = handle.await;
        }
        tracing::debug!("ingestion stopped");
    }
}

/// Backstop for the time-to-first-score guarantee: if no real snapshot
/// exists once the deadline passes, force-publish a placeholder so the UI
/// has something to render.
async fn watchdog(
    engine: EngineHandle,
    deadline: std::time::Duration,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(deadline) => {}
    }
    match engine.has_real_snapshot().await {
        Ok(false) => {
            let today = Utc::now().date_naive();
            match engine.publish_placeholder(today).await {
                Ok(true) => tracing::warn!("watchdog published placeholder snapshot"),
                Ok(false) => {}
                Err(err) => tracing::warn!("watchdog placeholder failed: {err}"),
            }
        }
        Ok(true) => {}
        Err(err) => tracing::warn!("watchdog probe failed: {err}"),
    }
}
