//! Feature bundle assembly
//!
//! Builds the fixed ten-key feature vector from resolved daily values,
//! baselines, and subjective inputs. Any key that cannot be resolved defaults
//! to a neutral `0.0`; flagging imputation is the aggregator's job. This is
//! the single seam guaranteeing every downstream consumer a complete,
//! fixed-shape vector regardless of data sparsity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::baseline::robust_z;
use crate::types::{Baseline, DailySummary, FeatureKey, FeatureSet, MetricKey};

/// User-reported inputs for one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectiveInputs {
    /// 1-7 rating.
    pub stress: Option<f64>,
    /// 1-7 rating.
    pub energy: Option<f64>,
    /// 1-7 rating.
    pub sleep_quality: Option<f64>,
    /// -1..1 sentiment score from on-device analysis.
    pub sentiment: Option<f64>,
}

pub struct FeatureBundleBuilder;

impl FeatureBundleBuilder {
    /// Assemble the complete vector; unresolvable keys stay at 0.0.
    pub fn build(
        summary: &DailySummary,
        baselines: &BTreeMap<MetricKey, Baseline>,
        subjective: &SubjectiveInputs,
    ) -> FeatureSet {
        let mut set = FeatureSet::default();

        for (key, metric, value) in [
            (FeatureKey::ZHrv, MetricKey::Hrv, summary.hrv_ms),
            (
                FeatureKey::ZNocthr,
                MetricKey::NocturnalHr,
                summary.nocturnal_hr_bpm,
            ),
            (
                FeatureKey::ZResthr,
                MetricKey::RestingHr,
                summary.resting_hr_bpm,
            ),
            (
                FeatureKey::ZSleepDebt,
                MetricKey::SleepDebt,
                summary.sleep_debt_hours,
            ),
            (
                FeatureKey::ZRr,
                MetricKey::RespiratoryRate,
                summary.respiratory_rate,
            ),
            (FeatureKey::ZSteps, MetricKey::Steps, summary.steps),
        ] {
            if let (Some(v), Some(baseline)) = (value, baselines.get(&metric)) {
                set.set(key, robust_z(v, baseline.median, baseline.mad));
            }
        }

        if let Some(v) = subjective.stress {
            set.subj_stress = v;
        }
        if let Some(v) = subjective.energy {
            set.subj_energy = v;
        }
        if let Some(v) = subjective.sleep_quality {
            set.subj_sleep_quality = v;
        }
        if let Some(v) = subjective.sentiment {
            set.sentiment = v;
        }

        set
    }
}
