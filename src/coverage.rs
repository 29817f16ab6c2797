//! Retrieval coverage gate
//!
//! Decides whether enough relevant indexed content exists to ground a
//! response to a user query, from the ranked retrieval matches, an optional
//! canonical topic, and whether the latest snapshot is running on sparse
//! (imputed) health data. The numeric thresholds are load-bearing constants;
//! they are not tunable at runtime.

use async_trait::async_trait;

use crate::baseline::median;
use crate::error::PipelineError;

/// Matches considered per query.
const MAX_MATCHES: usize = 10;
/// Distances are clamped to this before similarity conversion.
const DISTANCE_CLAMP: f64 = 4.0;

const STRONG_MIN_COUNT: usize = 3;
const STRONG_MEDIAN: f64 = 0.42;
const STRONG_TOP: f64 = 0.58;
const SOFT_TOPIC_MEDIAN: f64 = 0.35;
const COHESIVE_TOP: f64 = 0.50;
const COHESIVE_RATIO: f64 = 0.70;
const SPARSE_FAIL_TOP: f64 = 0.30;

/// One ranked match from the retrieval index.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalMatch {
    pub id: String,
    /// Distance score; lower is closer.
    pub distance: f64,
}

/// Retrieval index collaborator.
#[async_trait]
pub trait Retrieval: Send + Sync {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalMatch>, PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageKind {
    Strong,
    Soft,
    Fail,
}

/// Per-query groundedness decision. Transient; never persisted. The reason
/// and threshold are diagnostics for logging, not control flow.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageDecision {
    pub kind: CoverageKind,
    pub reason: String,
    pub count: usize,
    pub top: f64,
    pub median: f64,
    pub threshold_used: f64,
}

/// Similarity from a distance score: `1 / (1 + clamp(d, 0, 4))`.
pub fn similarity(distance: f64) -> f64 {
    1.0 / (1.0 + distance.clamp(0.0, DISTANCE_CLAMP))
}

pub struct CoverageGate;

impl CoverageGate {
    /// Classify query groundedness. Tiers, in order: strong, soft (cohesive,
    /// then on-topic-median, both requiring a known topic), the sparse-data
    /// relaxation, and fail.
    pub fn classify(
        matches: &[RetrievalMatch],
        topic: Option<&str>,
        sparse_data: bool,
    ) -> CoverageDecision {
        let sims: Vec<f64> = matches
            .iter()
            .take(MAX_MATCHES)
            .map(|m| similarity(m.distance))
            .collect();
        let count = sims.len();
        let top = sims.iter().copied().fold(0.0, f64::max);
        let med = median(&sims).unwrap_or(0.0);

        let decide = |kind, reason: &str, threshold| CoverageDecision {
            kind,
            reason: reason.to_string(),
            count,
            top,
            median: med,
            threshold_used: threshold,
        };

        if count >= STRONG_MIN_COUNT && med >= STRONG_MEDIAN && top >= STRONG_TOP {
            return decide(CoverageKind::Strong, "strong-consensus", STRONG_TOP);
        }

        if topic.is_some() {
            if top >= COHESIVE_TOP && med > 0.0 && med / top >= COHESIVE_RATIO {
                return decide(CoverageKind::Soft, "cohesive", COHESIVE_TOP);
            }
            if med >= SOFT_TOPIC_MEDIAN {
                return decide(CoverageKind::Soft, "on-topic-median", SOFT_TOPIC_MEDIAN);
            }
        }

        if sparse_data {
            if top < SPARSE_FAIL_TOP {
                return decide(CoverageKind::Fail, "sparse-data-low-top", SPARSE_FAIL_TOP);
            }
            return decide(CoverageKind::Soft, "sparse-data-relaxed", SPARSE_FAIL_TOP);
        }

        decide(CoverageKind::Fail, "below-thresholds", STRONG_MEDIAN)
    }
}
