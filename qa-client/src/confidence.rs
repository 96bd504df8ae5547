//! Answer confidence derived from evidence relevance scores.
//!
//! Cross-encoder scores are unbounded logits and go through a sigmoid; cosine
//! similarities are clamped to `[0, 1]`. The answer score is the best of the
//! top three chunks, so one strong match is not diluted by weak ones.

use serde::{Deserialize, Serialize};

use crate::types::EvidenceChunk;

const HIGH_THRESHOLD: f64 = 0.75;
const MEDIUM_THRESHOLD: f64 = 0.5;
const TOP_N: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeColor {
    Green,
    Amber,
    Red,
}

/// Display confidence of one completed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInfo {
    /// Normalized score in `[0, 1]`.
    pub score: f64,
    pub level: ConfidenceLevel,
    pub label: String,
    pub color: BadgeColor,
}

/// Logistic normalization `1 / (1 + e^-x)`.
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Confidence of a single chunk in `[0, 1]`; rerank score wins over cosine.
pub fn chunk_confidence(chunk: &EvidenceChunk) -> f64 {
    let raw = match (chunk.rerank_score, chunk.score) {
        (Some(rerank), _) => sigmoid(rerank),
        (None, Some(cosine)) => cosine.clamp(0.0, 1.0),
        (None, None) => 0.0,
    };
    if raw.is_nan() { 0.0 } else { raw }
}

/// Aggregates evidence into a display confidence.
pub fn answer_confidence(evidence: &[EvidenceChunk]) -> ConfidenceInfo {
    if evidence.is_empty() {
        return ConfidenceInfo {
            score: 0.0,
            level: ConfidenceLevel::Low,
            label: "no sources".to_string(),
            color: BadgeColor::Red,
        };
    }

    let mut scores: Vec<f64> = evidence.iter().map(chunk_confidence).collect();
    scores.sort_by(|a, b| b.total_cmp(a));
    let score = scores
        .iter()
        .take(TOP_N)
        .copied()
        .fold(0.0_f64, f64::max);

    confidence_badge(score)
}

/// Maps a normalized score onto the badge thresholds.
pub fn confidence_badge(score: f64) -> ConfidenceInfo {
    let (level, label, color) = if score >= HIGH_THRESHOLD {
        (ConfidenceLevel::High, "high", BadgeColor::Green)
    } else if score >= MEDIUM_THRESHOLD {
        (ConfidenceLevel::Medium, "medium", BadgeColor::Amber)
    } else {
        (ConfidenceLevel::Low, "low", BadgeColor::Red)
    };

    ConfidenceInfo {
        score,
        level,
        label: label.to_string(),
        color,
    }
}
