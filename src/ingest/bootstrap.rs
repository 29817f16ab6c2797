//! Bootstrap fetch
//!
//! The time-to-first-score path: a narrow fetch per source type with a hard
//! deadline, a one-shot wide fallback when the narrow window is empty,
//! concurrent exponential retry ladders for types that genuinely failed, and
//! an immediate placeholder when every type failed outright.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::engine::EngineHandle;
use crate::error::PipelineError;
use crate::harness::{classify_fetch, run_with_deadline, FetchOutcome, RetrySchedule};
use crate::source::{AccessStatus, DateRange, HealthSource};
use crate::types::SampleType;

pub(super) struct Bootstrap {
    pub(super) engine: EngineHandle,
    pub(super) source: Arc<dyn HealthSource>,
    pub(super) config: Arc<PipelineConfig>,
    pub(super) cancel: CancellationToken,
}

impl Bootstrap {
    pub(super) async fn run(self) {
        let access = match self.source.probe_read_access(&SampleType::ALL).await {
            Ok(access) => access,
            Err(err) => {
                tracing::warn!("read-access probe failed: {err}");
                return;
            }
        };
        let readable: Vec<SampleType> = SampleType::ALL
            .into_iter()
            .filter(|ty| access.get(ty) != Some(&AccessStatus::Denied))
            .collect();
        if readable.is_empty() {
            tracing::warn!("no readable sample types; bootstrap skipped");
            return;
        }

        let today = Utc::now().date_naive();
        let narrow = DateRange::days_back(today, self.config.bootstrap_window_days);

        let mut outcomes = Vec::with_capacity(readable.len());
        for ty in &readable {
            let outcome = self
                .attempt(*ty, narrow, self.config.bootstrap_timeout)
                .await;
            tracing::debug!(ty = ty.as_str(), ?outcome, "bootstrap fetch");
            outcomes.push((*ty, outcome));
        }
        if outcomes.iter().any(|(_, o)| *o == FetchOutcome::Cancelled) {
            return;
        }

        // Nothing in the narrow window: one wide fetch before giving up.
        if !self.has_real_snapshot().await {
            let wide = DateRange::days_back(today, self.config.fallback_window_days);
            for ty in &readable {
                let outcome = self
                    .attempt(*ty, wide, self.config.retry_timeout_cap)
                    .await;
                if outcome == FetchOutcome::Cancelled {
                    return;
                }
            }
        }

        // Every type failed outright: publish the placeholder now rather
        // than making the caller wait out the watchdog. An all-empty
        // bootstrap is the watchdog's call to make.
        let all_failed = outcomes.iter().all(|(_, o)| o.is_failure());
        if all_failed && !self.has_real_snapshot().await {
            match self.engine.publish_placeholder(today).await {
                Ok(true) => tracing::info!("bootstrap failed everywhere; placeholder published"),
                Ok(false) => {}
                Err(err) => tracing::warn!("placeholder publish failed: {err}"),
            }
        }

        // Retry ladders for the failed types, one task each so a slow ladder
        // does not delay the others.
        let this = Arc::new(self);
        let mut ladders = Vec::new();
        for (ty, outcome) in outcomes {
            if outcome.is_failure() {
                let this = this.clone();
                ladders.push(tokio::spawn(async move { this.retry(ty, narrow).await }));
            }
        }
        for ladder in ladders {
            let _ = ladder.await;
        }
    }

    /// One deadline-wrapped fetch; fetched samples go straight to the engine.
    /// High-volume types fall back to daily aggregates when raw samples are
    /// absent.
    async fn attempt(
        &self,
        ty: SampleType,
        range: DateRange,
        timeout: Duration,
    ) -> FetchOutcome {
        let fetched = tokio::select! {
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled),
            result = run_with_deadline(timeout, self.source.fetch_samples(ty, range)) => result,
        };
        let (outcome, samples) = classify_fetch(fetched);
        if !samples.is_empty() {
            if let Err(err) = self.engine.ingest_samples(samples).await {
                tracing::warn!(ty = ty.as_str(), "ingest failed: {err}");
                return FetchOutcome::Error;
            }
        }

        if outcome == FetchOutcome::Empty && ty.is_high_volume() {
            return self.attempt_aggregates(ty, range, timeout).await;
        }
        outcome
    }

    async fn attempt_aggregates(
        &self,
        ty: SampleType,
        range: DateRange,
        timeout: Duration,
    ) -> FetchOutcome {
        let fetched = tokio::select! {
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled),
            result = run_with_deadline(timeout, self.source.fetch_daily_aggregates(ty, range)) => result,
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

    /// Exponential-backoff retries for one failed type. Stops early once any
    /// real snapshot exists; its job was only the first score.
    async fn retry(&self, ty: SampleType, range: DateRange) {
        let mut schedule = RetrySchedule::new(
            self.config.retry_base_delay,
            self.config.bootstrap_timeout,
            self.config.retry_timeout_cap,
            self.config.retry_max_attempts,
            self.config.retry_max_elapsed,
        );
        while let Some(attempt) = schedule.next() {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(attempt.delay) => {}
            }
            if self.has_real_snapshot().await {
                return;
            }
            let outcome = self.attempt(ty, range, attempt.timeout).await;
            tracing::debug!(
                ty = ty.as_str(),
                attempt = attempt.attempt,
                ?outcome,
                "bootstrap retry"
            );
            if !outcome.is_failure() {
                return;
            }
        }
        tracing::warn!(ty = ty.as_str(), "bootstrap retries exhausted");
    }

    async fn has_real_snapshot(&self) -> bool {
        self.engine.has_real_snapshot().await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::ingest::tests::sample;
    use crate::store::MemoryStore;
    use crate::testutil::{ScriptedResponse, ScriptedSource};
    use crate::types::DailyAggregate;

    async fn fixture() -> (EngineHandle, Arc<ScriptedSource>, Bootstrap) {
        crate::testutil::init_tracing();
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::spawn(store, PipelineConfig::default())
            .await
            .unwrap();
        let source = Arc::new(ScriptedSource::new());
        let bootstrap = Bootstrap {
            engine: engine.clone(),
            source: source.clone(),
            config: Arc::new(PipelineConfig::default()),
            cancel: CancellationToken::new(),
        };
        (engine, source, bootstrap)
    }

    #[tokio::test(start_paused = true)]
    async fn successful_fetch_produces_a_real_snapshot() {
        let (engine, source, bootstrap) = fixture().await;
        let today = Utc::now().date_naive();
        source.script_all(vec![ScriptedResponse::Empty]);
        source.script(
            SampleType::Hrv,
            vec![ScriptedResponse::Samples(vec![sample(
                SampleType::Hrv,
                today,
                3,
                58.0,
            )])],
        );

        bootstrap.run().await;
        let snapshot = engine.latest_snapshot(false).await.unwrap().unwrap();
        assert_eq!(snapshot.date, today);
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_publish_a_placeholder() {
        let (engine, source, bootstrap) = fixture().await;
        source.script_all(vec![
            ScriptedResponse::Fail("unreachable".into()),
            // Wide fallback and retries also fail.
            ScriptedResponse::Fail("unreachable".into()),
            ScriptedResponse::Fail("unreachable".into()),
        ]);

        bootstrap.run().await;
        assert_eq!(engine.latest_snapshot(false).await.unwrap(), None);
        let snapshot = engine.latest_snapshot(true).await.unwrap().unwrap();
        assert!(snapshot.imputed.placeholder);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_fetch_times_out_and_falls_back_to_wide_window() {
        let (engine, source, bootstrap) = fixture().await;
        let old_day = Utc::now().date_naive() - chrono::Duration::days(10);
        source.script_all(vec![ScriptedResponse::Empty, ScriptedResponse::Empty]);
        source.script(
            SampleType::Hrv,
            vec![
                ScriptedResponse::Hang,
                ScriptedResponse::Samples(vec![sample(SampleType::Hrv, old_day, 3, 61.0)]),
            ],
        );

        bootstrap.run().await;
        let snapshot = engine.latest_snapshot(false).await.unwrap().unwrap();
        assert_eq!(snapshot.date, old_day);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_after_transient_failures() {
        let (engine, source, bootstrap) = fixture().await;
        let today = Utc::now().date_naive();
        source.script_all(vec![ScriptedResponse::Empty, ScriptedResponse::Empty]);
        source.script(
            SampleType::Sleep,
            vec![
                ScriptedResponse::Fail("flaky".into()),
                ScriptedResponse::Empty, // wide fallback
                ScriptedResponse::Samples(vec![{
                    let mut s = sample(SampleType::Sleep, today, 0, 0.0);
                    s.end = crate::ingest::tests::at(today, 7);
                    s
                }]),
            ],
        );

        bootstrap.run().await;
        // The retry's success wrote a real vector.
        let snapshot = engine.latest_snapshot(true).await.unwrap().unwrap();
        assert!(!snapshot.imputed.placeholder);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_bootstrap_leaves_the_placeholder_to_the_watchdog() {
        let (engine, source, bootstrap) = fixture().await;
        // Narrow and wide windows both come back empty, without errors.
        source.script_all(vec![ScriptedResponse::Empty, ScriptedResponse::Empty]);

        bootstrap.run().await;
        assert_eq!(engine.latest_snapshot(true).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_types_retry_concurrently() {
        let (_engine, source, bootstrap) = fixture().await;
        // Narrow, wide, and all five retries fail for both types.
        let fails: Vec<ScriptedResponse> =
            std::iter::repeat(ScriptedResponse::Fail("unreachable".into()))
                .take(7)
                .collect();
        source.script(SampleType::Hrv, fails.clone());
        source.script(SampleType::Sleep, fails);

        let started = tokio::time::Instant::now();
        bootstrap.run().await;
        // Each ladder sleeps 2+4+8+16+32 seconds. Run back to back the two
        // ladders would need over two minutes.
        assert!(started.elapsed() < Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn denied_types_are_never_fetched() {
        let (_engine, source, bootstrap) = fixture().await;
        for ty in SampleType::ALL {
            source.set_access(ty, AccessStatus::Denied);
        }
        source.set_access(SampleType::Steps, AccessStatus::Authorized);
        source.script_all(vec![ScriptedResponse::Empty, ScriptedResponse::Empty]);

        bootstrap.run().await;
        assert!(source.fetches().iter().all(|(ty, _)| *ty == SampleType::Steps));
    }

    #[tokio::test(start_paused = true)]
    async fn aggregates_cover_for_missing_high_volume_samples() {
        let (engine, source, bootstrap) = fixture().await;
        let today = Utc::now().date_naive();
        source.script_all(vec![ScriptedResponse::Empty, ScriptedResponse::Empty]);
        source.set_aggregates(
            SampleType::Steps,
            vec![DailyAggregate {
                date: today,
                sample_type: SampleType::Steps,
                value: 8200.0,
            }],
        );

        bootstrap.run().await;
        let snapshot = engine.latest_snapshot(false).await.unwrap().unwrap();
        assert_eq!(snapshot.date, today);
    }
}
