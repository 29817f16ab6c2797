//! Daily aggregation
//!
//! Folds raw samples into the per-day record (bounded buffers plus
//! aggregated fallbacks), derives sleep and sedentary intervals, and
//! resolves the day's `DailySummary` with explicit imputation flags.
//!
//! Resolution priority per metric: aggregated fallback → buffered samples
//! within the sleep interval → buffered samples within a detected sedentary
//! interval → the previous day's resolved value (marked imputed) → absent.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::types::{
    DailyAggregate, DailyFlags, DailyMetrics, DailySummary, HeartRateTag, ImputedFlags,
    Sample, SamplePoint, SampleType, SleepSegment, StepBucket, TaggedPoint,
};

/// Maximum gap between step buckets still considered one contiguous span.
const SEDENTARY_MAX_GAP_MINUTES: i64 = 10;

/// A half-open time interval within a day.
type Interval = (DateTime<Utc>, DateTime<Utc>);

pub struct Aggregator {
    buffer_cap: usize,
    sedentary_steps_per_hour: f64,
    sedentary_min_minutes: i64,
    default_sleep_need_hours: f64,
    sleep_need_band_hours: f64,
    sleep_need_min_nights: usize,
    sleep_debt_window_days: usize,
}

impl Aggregator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            buffer_cap: config.sample_buffer_cap,
            sedentary_steps_per_hour: config.sedentary_steps_per_hour,
            sedentary_min_minutes: config.sedentary_min_minutes,
            default_sleep_need_hours: config.default_sleep_need_hours,
            sleep_need_band_hours: config.sleep_need_band_hours,
            sleep_need_min_nights: config.sleep_need_min_nights,
            sleep_debt_window_days: config.sleep_debt_window_days,
        }
    }

    pub fn buffer_cap(&self) -> usize {
        self.buffer_cap
    }

    /// Route raw samples into the day's buffers. Duplicate ids are no-ops.
    pub fn apply_samples(&self, metrics: &mut DailyMetrics, samples: &[Sample]) {
        for sample in samples {
            match sample.sample_type {
                SampleType::Hrv => metrics.flags.hrv.push(SamplePoint {
                    id: sample.id,
                    at: sample.start,
                    value: sample.value,
                }),
                SampleType::HeartRate => metrics.flags.heart_rate.push(TaggedPoint {
                    id: sample.id,
                    at: sample.start,
                    value: sample.value,
                    tag: sample.tag.unwrap_or(HeartRateTag::Normal),
                }),
                SampleType::RespiratoryRate => metrics.flags.respiratory.push(SamplePoint {
                    id: sample.id,
                    at: sample.start,
                    value: sample.value,
                }),
                SampleType::Sleep => metrics.flags.sleep.push(SleepSegment {
                    id: sample.id,
                    start: sample.start,
                    end: sample.end,
                }),
                SampleType::Steps => metrics.flags.steps.push(StepBucket {
                    id: sample.id,
                    start: sample.start,
                    end: sample.end,
                    count: sample.value,
                }),
            }
        }
    }

    /// Record aggregated fallbacks for high-volume types.
    pub fn apply_aggregates(&self, metrics: &mut DailyMetrics, aggregates: &[DailyAggregate]) {
        for agg in aggregates {
            match agg.sample_type {
                SampleType::Steps => metrics.flags.steps_total = Some(agg.value),
                SampleType::HeartRate => metrics.flags.hr_mean_bpm = Some(agg.value),
                _ => {}
            }
        }
    }

    /// Remove deleted samples from every buffer. Absent ids are no-ops.
    /// Returns whether anything changed.
    pub fn apply_deletions(&self, metrics: &mut DailyMetrics, deleted: &[Uuid]) -> bool {
        let mut changed = false;
        for id in deleted {
            changed |= metrics.flags.hrv.remove(*id);
            changed |= metrics.flags.heart_rate.remove(*id);
            changed |= metrics.flags.respiratory.remove(*id);
            changed |= metrics.flags.sleep.remove(*id);
            changed |= metrics.flags.steps.remove(*id);
        }
        changed
    }

    /// The day's sleep interval: earliest start to latest end over all
    /// segments.
    pub fn sleep_interval(flags: &DailyFlags) -> Option<Interval> {
        let start = flags.sleep.iter().map(|s| s.start).min()?;
        let end = flags.sleep.iter().map(|s| s.end).max()?;
        Some((start, end))
    }

    /// Total slept seconds, with overlapping segments merged so they are not
    /// double counted.
    pub fn sleep_seconds(flags: &DailyFlags) -> Option<f64> {
        if flags.sleep.is_empty() {
            return None;
        }
        let mut segments: Vec<Interval> =
            flags.sleep.iter().map(|s| (s.start, s.end)).collect();
        segments.sort_by_key(|(start, _)| *start);
        let mut merged: Vec<Interval> = Vec::new();
        for (start, end) in segments {
            match merged.last_mut() {
                Some((_, last_end)) if start <= *last_end => {
                    if end > *last_end {
                        *last_end = end;
                    }
                }
                _ => merged.push((start, end)),
            }
        }
        let total: i64 = merged
            .iter()
            .map(|(start, end)| (*end - *start).num_seconds().max(0))
            .sum();
        Some(total as f64)
    }

    /// Sedentary spans: contiguous runs of low-rate step buckets lasting at
    /// least the minimum duration, excluding any span overlapping sleep.
    pub fn sedentary_intervals(&self, flags: &DailyFlags, sleep: Option<Interval>) -> Vec<Interval> {
        let mut buckets: Vec<&StepBucket> = flags.steps.iter().collect();
        buckets.sort_by_key(|b| b.start);

        let mut spans: Vec<Interval> = Vec::new();
        let mut current: Option<Interval> = None;

        for bucket in buckets {
            let hours = (bucket.end - bucket.start).num_seconds().max(1) as f64 / 3600.0;
            let rate = bucket.count / hours;
            let low = rate <= self.sedentary_steps_per_hour;

            match (&mut current, low) {
                (Some((_, end)), true)
                    if (bucket.start - *end).num_minutes() <= SEDENTARY_MAX_GAP_MINUTES =>
                {
                    if bucket.end > *end {
                        *end = bucket.end;
                    }
                }
                (span, true) => {
                    if let Some(done) = span.take() {
                        spans.push(done);
                    }
                    *span = Some((bucket.start, bucket.end));
                }
                (span, false) => {
                    if let Some(done) = span.take() {
                        spans.push(done);
                    }
                }
            }
        }
        if let Some(done) = current {
            spans.push(done);
        }

        spans
            .into_iter()
            .filter(|(start, end)| (*end - *start).num_minutes() >= self.sedentary_min_minutes)
            .filter(|span| match sleep {
                Some(sleep_span) => !overlaps(*span, sleep_span),
                None => true,
            })
            .collect()
    }

    /// Personal nightly sleep need: trailing mean clamped to a band around
    /// the default, requiring a minimum night count else the default outright.
    pub fn personal_sleep_need(&self, nightly_hours: &[f64]) -> f64 {
        if nightly_hours.len() < self.sleep_need_min_nights {
            return self.default_sleep_need_hours;
        }
        let mean = nightly_hours.iter().sum::<f64>() / nightly_hours.len() as f64;
        mean.clamp(
            self.default_sleep_need_hours - self.sleep_need_band_hours,
            self.default_sleep_need_hours + self.sleep_need_band_hours,
        )
    }

    /// Sleep debt: sum of `max(0, need - actual)` over the trailing window.
    pub fn sleep_debt(&self, trailing_nightly_hours: &[f64], need: f64) -> f64 {
        trailing_nightly_hours
            .iter()
            .map(|actual| (need - actual).max(0.0))
            .sum()
    }

    /// Resolve the day's summary from its buffers, aggregated fallbacks, the
    /// previous day's resolved record, and trailing history (ascending, days
    /// strictly before this one). Pure: same inputs, same summary.
    pub fn resolve(
        &self,
        metrics: &DailyMetrics,
        prev: Option<&DailyMetrics>,
        history: &[DailyMetrics],
    ) -> DailySummary {
        let flags = &metrics.flags;
        let mut imputed = ImputedFlags::default();

        let sleep_span = Self::sleep_interval(flags);
        let sedentary = self.sedentary_intervals(flags, sleep_span);

        // Sleep duration: measured segments, else carried from yesterday.
        let sleep_seconds = match Self::sleep_seconds(flags) {
            Some(secs) => Some(secs),
            None => {
                let carried = prev.and_then(|p| p.sleep_seconds);
                if carried.is_some() {
                    imputed.sleep = true;
                }
                carried
            }
        };

        // HRV: nocturnal samples preferred, then sedentary, then yesterday.
        let hrv_ms = mean_in(flags.hrv.iter().map(|p| (p.at, p.value)), sleep_span)
            .or_else(|| {
                mean_in_any(flags.hrv.iter().map(|p| (p.at, p.value)), &sedentary)
            })
            .or_else(|| {
                let carried = prev.and_then(|p| p.hrv_ms);
                if carried.is_some() {
                    imputed.hrv = true;
                }
                carried
            });

        // Nocturnal HR: normal-tagged samples within the sleep interval.
        let nocturnal_hr_bpm = mean_in(
            flags
                .heart_rate
                .iter()
                .filter(|p| p.tag == HeartRateTag::Normal)
                .map(|p| (p.at, p.value)),
            sleep_span,
        )
        .or_else(|| {
            let carried = prev.and_then(|p| p.nocturnal_hr_bpm);
            if carried.is_some() {
                imputed.nocturnal_hr = true;
            }
            carried
        });

        // Resting HR: aggregate, then resting-tagged samples, then normal
        // samples within a sedentary span, then yesterday.
        let resting_hr_bpm = flags
            .resting_hr_agg_bpm
            .or_else(|| {
                mean(
                    flags
                        .heart_rate
                        .iter()
                        .filter(|p| p.tag == HeartRateTag::Resting)
                        .map(|p| p.value),
                )
            })
            .or_else(|| {
                mean_in_any(
                    flags
                        .heart_rate
                        .iter()
                        .filter(|p| p.tag == HeartRateTag::Normal)
                        .map(|p| (p.at, p.value)),
                    &sedentary,
                )
            })
            .or_else(|| {
                let carried = prev.and_then(|p| p.resting_hr_bpm);
                if carried.is_some() {
                    imputed.resting_hr = true;
                }
                carried
            });

        // Respiratory rate: sleep samples, then sedentary, then yesterday.
        let respiratory_rate = mean_in(
            flags.respiratory.iter().map(|p| (p.at, p.value)),
            sleep_span,
        )
        .or_else(|| {
            mean_in_any(
                flags.respiratory.iter().map(|p| (p.at, p.value)),
                &sedentary,
            )
        })
        .or_else(|| {
            let carried = prev.and_then(|p| p.respiratory_rate);
            if carried.is_some() {
                imputed.respiratory_rate = true;
            }
            carried
        });

        // Steps: aggregate total, then summed buckets, then yesterday.
        let steps = flags
            .steps_total
            .or_else(|| {
                if flags.steps.is_empty() {
                    None
                } else {
                    Some(flags.steps.iter().map(|b| b.count).sum())
                }
            })
            .or_else(|| {
                let carried = prev.and_then(|p| p.steps);
                if carried.is_some() {
                    imputed.steps = true;
                }
                carried
            });

        // Sleep debt over the trailing window against the personal need.
        let need_history: Vec<f64> = history
            .iter()
            .filter_map(|m| m.sleep_seconds)
            .map(|secs| secs / 3600.0)
            .collect();
        let need = self.personal_sleep_need(&need_history);

        let mut trailing: Vec<f64> = history
            .iter()
            .rev()
            .take(self.sleep_debt_window_days - 1)
            .filter_map(|m| m.sleep_seconds)
            .map(|secs| secs / 3600.0)
            .collect();
        if let Some(secs) = sleep_seconds {
            trailing.push(secs / 3600.0);
        }
        let sleep_debt_hours = if trailing.is_empty() {
            imputed.sleep_debt = true;
            None
        } else {
            if imputed.sleep || sleep_seconds.is_none() {
                imputed.sleep_debt = true;
            }
            Some(self.sleep_debt(&trailing, need))
        };

        DailySummary {
            date: metrics.date,
            hrv_ms,
            nocturnal_hr_bpm,
            resting_hr_bpm,
            sleep_seconds,
            sleep_debt_hours,
            respiratory_rate,
            steps,
            imputed,
        }
    }
}

fn overlaps(a: Interval, b: Interval) -> bool {
    a.0 < b.1 && b.0 < a.1
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let collected: Vec<f64> = values.collect();
    if collected.is_empty() {
        None
    } else {
        Some(collected.iter().sum::<f64>() / collected.len() as f64)
    }
}

/// Mean of timestamped values falling inside one interval.
fn mean_in(
    values: impl Iterator<Item = (DateTime<Utc>, f64)>,
    span: Option<Interval>,
) -> Option<f64> {
    let (start, end) = span?;
    mean(
        values
            .filter(|(at, _)| *at >= start && *at <= end)
            .map(|(_, v)| v),
    )
}

/// Mean of timestamped values falling inside any of the given intervals.
fn mean_in_any(
    values: impl Iterator<Item = (DateTime<Utc>, f64)>,
    spans: &[Interval],
) -> Option<f64> {
    if spans.is_empty() {
        return None;
    }
    mean(
        values
            .filter(|(at, _)| spans.iter().any(|(s, e)| *at >= *s && *at <= *e))
            .map(|(_, v)| v),
    )
}
