//! Baseline management
//!
//! Rolling robust statistics (median, MAD) and an exponentially-weighted
//! moving average per metric, windowed over a configurable day count.
//! Baselines enable relative interpretation of daily values and tolerate
//! missing days: the window is simply the most recent values that exist.

use chrono::{DateTime, Utc};

use crate::config::PipelineConfig;
use crate::types::{Baseline, MetricKey};

/// Consistency constant making MAD comparable to a standard deviation for
/// normally distributed data.
pub const MAD_CONSISTENCY: f64 = 1.4826;

/// Floor applied to the z-score denominator so a zero/near-zero MAD cannot
/// blow the division up.
pub const SCALE_FLOOR: f64 = 0.05;

/// Median of a value slice. `None` when empty.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median absolute deviation around a given center.
pub fn mad(values: &[f64], center: f64) -> f64 {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations).unwrap_or(0.0)
}

/// Guarded z-score denominator.
pub fn scale(mad: f64) -> f64 {
    (MAD_CONSISTENCY * mad).max(SCALE_FLOOR)
}

/// Robust z-score: `(value - median) / scale(mad)`.
pub fn robust_z(value: f64, median: f64, mad: f64) -> f64 {
    (value - median) / scale(mad)
}

/// Windowed baseline recomputation.
///
/// Recomputed and upserted every time a day is (re)processed: given the same
/// final daily values, reprocessing yields the same baseline as if those
/// values had been present from the start. The EWMA is therefore folded over
/// the window rather than nudged off the previously persisted record.
pub struct BaselineEngine {
    window_days: usize,
    sleep_debt_window_days: usize,
    alpha: f64,
}

impl BaselineEngine {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            window_days: config.baseline_window_days,
            sleep_debt_window_days: config.sleep_debt_window_days,
            alpha: config.ewma_alpha,
        }
    }

    /// Window size for a metric: sleep debt uses the short window.
    pub fn window_for(&self, metric: MetricKey) -> usize {
        match metric {
            MetricKey::SleepDebt => self.sleep_debt_window_days,
            _ => self.window_days,
        }
    }

    /// Recompute a metric's baseline from its daily values, oldest first.
    /// Only the most recent `window_for(metric)` values are considered.
    /// Returns `None` when there is no data at all.
    pub fn recompute(
        &self,
        metric: MetricKey,
        daily_values: &[f64],
        now: DateTime<Utc>,
    ) -> Option<Baseline> {
        let window = self.window_for(metric);
        let start = daily_values.len().saturating_sub(window);
        let windowed = &daily_values[start..];
        let med = median(windowed)?;
        let mad_value = mad(windowed, med);
        let ewma = windowed
            .iter()
            .copied()
            .reduce(|prev, v| self.alpha * v + (1.0 - self.alpha) * prev)
            .unwrap_or(med);
        Some(Baseline {
            metric,
            window_days: window,
            median: med,
            mad: mad_value,
            ewma,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine() -> BaselineEngine {
        BaselineEngine::new(&PipelineConfig::default())
    }

    #[test]
    fn median_of_odd_and_even_counts() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn mad_matches_hand_computed_value() {
        // values: 50 55 60 65 70; median 60; |dev|: 10 5 0 5 10; MAD = 5
        let values = [50.0, 55.0, 60.0, 65.0, 70.0];
        let med = median(&values).unwrap();
        assert_eq!(med, 60.0);
        assert_eq!(mad(&values, med), 5.0);
    }

    #[test]
    fn z_score_matches_hand_computed_value() {
        let values = [50.0, 55.0, 60.0, 65.0, 70.0];
        let med = median(&values).unwrap();
        let m = mad(&values, med);
        // z for 72: (72-60)/(1.4826*5) = 12/7.413
        let expected = 12.0 / (1.4826 * 5.0);
        assert!((robust_z(72.0, med, m) - expected).abs() < 1e-9);
    }

    #[test]
    fn zero_mad_is_floored_not_divided_by() {
        // Identical values: MAD 0, denominator floored at SCALE_FLOOR.
        let z = robust_z(61.0, 60.0, 0.0);
        assert!((z - 1.0 / SCALE_FLOOR).abs() < 1e-9);
        assert!(z.is_finite());
    }

    #[test]
    fn recompute_uses_only_the_window() {
        let eng = engine();
        // Sleep debt window is 7; values beyond it must be ignored.
        let mut values = vec![100.0; 10];
        values.extend_from_slice(&[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        let baseline = eng
            .recompute(MetricKey::SleepDebt, &values, Utc::now())
            .unwrap();
        assert_eq!(baseline.window_days, 7);
        assert_eq!(baseline.median, 1.0);
        assert_eq!(baseline.mad, 0.0);
    }

    #[test]
    fn recompute_is_idempotent() {
        let eng = engine();
        let values = [60.0, 62.0, 58.0, 64.0, 61.0];
        let now = Utc::now();
        let a = eng.recompute(MetricKey::Hrv, &values, now).unwrap();
        let b = eng.recompute(MetricKey::Hrv, &values, now).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn ewma_folds_over_window() {
        let eng = engine();
        let values = [10.0, 20.0];
        let baseline = eng.recompute(MetricKey::Hrv, &values, Utc::now()).unwrap();
        // seed 10, then 0.2*20 + 0.8*10 = 12
        assert!((baseline.ewma - 12.0).abs() < 1e-9);
    }

    #[test]
    fn single_value_seeds_ewma() {
        let eng = engine();
        let baseline = eng
            .recompute(MetricKey::Steps, &[8000.0], Utc::now())
            .unwrap();
        assert_eq!(baseline.ewma, 8000.0);
        assert_eq!(baseline.median, 8000.0);
    }

    #[test]
    fn empty_history_yields_none() {
        let eng = engine();
        assert!(eng.recompute(MetricKey::Hrv, &[], Utc::now()).is_none());
    }
}
