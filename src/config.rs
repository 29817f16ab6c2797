//! Pipeline configuration
//!
//! Every window, timeout, cap, and model constant lives here so behaviour is
//! reproducible and tunable in one place. The pseudo-target weights are
//! hand-tuned domain constants (what a "good day" looks like), exposed as a
//! tunable surface rather than fixed algorithmic truth.

use std::time::Duration;

/// Weights of the hand-specified pseudo-target used by the online estimator.
///
/// Each weight multiplies the corresponding *normalized* feature; the sign
/// encodes the direction of "good" (high HRV is good, high sleep debt is bad).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetWeights {
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

impl Default for TargetWeights {
    fn default() -> Self {
        Self {
            z_hrv: 0.30,
            z_nocthr: -0.15,
            z_resthr: -0.20,
            z_sleep_debt: -0.30,
            z_rr: -0.10,
            z_steps: 0.10,
            subj_stress: -0.25,
            subj_energy: 0.25,
            subj_sleep_quality: 0.20,
            sentiment: 0.15,
        }
    }
}

/// Top-level configuration for the ingestion and scoring pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Days fetched during bootstrap for a fast first score.
    pub bootstrap_window_days: i64,
    /// Per-type fetch timeout during the first bootstrap attempt.
    pub bootstrap_timeout: Duration,
    /// Base delay of the bootstrap retry backoff (`delay = base * 2^(n-1)`).
    pub retry_base_delay: Duration,
    /// Maximum bootstrap retry attempts per source type.
    pub retry_max_attempts: u32,
    /// Maximum total elapsed time across all retries for one type.
    pub retry_max_elapsed: Duration,
    /// Per-attempt fetch timeout ceiling during retries.
    pub retry_timeout_cap: Duration,
    /// Width of the one-shot fallback fetch when bootstrap yields nothing.
    pub fallback_window_days: i64,
    /// Watchdog deadline: a placeholder is force-published if no real
    /// snapshot exists this long after authorization.
    pub watchdog_deadline: Duration,
    /// Days covered by the warm-start backfill.
    pub warm_start_days: i64,
    /// Target depth of the full backfill.
    pub full_backfill_days: i64,
    /// Days fetched per full-backfill batch.
    pub backfill_batch_days: i64,
    /// Upper bound on full-backfill loop iterations per scheduling.
    pub backfill_iteration_cap: u32,
    /// Sleep between full-backfill iterations so other work is not starved.
    pub backfill_pause: Duration,
    /// Debounce window for snapshot-changed notifications.
    pub change_debounce: Duration,
    /// Capacity of each per-signal sample buffer.
    pub sample_buffer_cap: usize,
    /// Steps/hour at or below which a span counts as sedentary.
    pub sedentary_steps_per_hour: f64,
    /// Minimum sedentary span length.
    pub sedentary_min_minutes: i64,
    /// Baseline window for most metrics (days).
    pub baseline_window_days: usize,
    /// Baseline window for sleep debt (days).
    pub sleep_debt_window_days: usize,
    /// EWMA smoothing factor.
    pub ewma_alpha: f64,
    /// Default nightly sleep need (hours) before personalization.
    pub default_sleep_need_hours: f64,
    /// Personal sleep need is clamped to this band around the default.
    pub sleep_need_band_hours: f64,
    /// Nights of history required before personalizing sleep need.
    pub sleep_need_min_nights: usize,
    /// Online model learning rate.
    pub learning_rate: f64,
    /// Wellbeing score is clamped to `[-score_limit, score_limit]`.
    pub score_limit: f64,
    /// Scale applied to imputed z-features before normalization.
    pub imputed_dampening: f64,
    /// Pseudo-target weights for the online update.
    pub target_weights: TargetWeights,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bootstrap_window_days: 2,
            bootstrap_timeout: Duration::from_secs(4),
            retry_base_delay: Duration::from_secs(2),
            retry_max_attempts: 5,
            retry_max_elapsed: Duration::from_secs(300),
            retry_timeout_cap: Duration::from_secs(30),
            fallback_window_days: 30,
            watchdog_deadline: Duration::from_secs(10),
            warm_start_days: 7,
            full_backfill_days: 30,
            backfill_batch_days: 5,
            backfill_iteration_cap: 64,
            backfill_pause: Duration::from_millis(250),
            change_debounce: Duration::from_millis(300),
            sample_buffer_cap: 288,
            sedentary_steps_per_hour: 60.0,
            sedentary_min_minutes: 45,
            baseline_window_days: 30,
            sleep_debt_window_days: 7,
            ewma_alpha: 0.2,
            default_sleep_need_hours: 7.5,
            sleep_need_band_hours: 0.75,
            sleep_need_min_nights: 7,
            learning_rate: 0.05,
            score_limit: 1.0,
            imputed_dampening: 0.5,
            target_weights: TargetWeights::default(),
        }
    }
}
