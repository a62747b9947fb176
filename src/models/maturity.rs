use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::project::Phase;

/// Lowest allowed maturity score.
pub const MIN_SCORE: f64 = 0.0;
/// Highest allowed maturity score.
pub const MAX_SCORE: f64 = 100.0;

/// Rejected maturity write.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("maturity score {score} for {phase}/{category} is outside [0, 100]")]
pub struct ScoreOutOfRange {
    pub phase: Phase,
    pub category: String,
    pub score: f64,
}

/// Maturity scores keyed by phase, then by category.
///
/// Every stored value is finite and within `[MIN_SCORE, MAX_SCORE]`; `set`
/// refuses anything else, so an out-of-range value can only enter through
/// deserialization, which `is_within_bounds` catches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Maturity(BTreeMap<Phase, BTreeMap<String, f64>>);

impl Maturity {
    pub fn is_valid_score(score: f64) -> bool {
        score.is_finite() && (MIN_SCORE..=MAX_SCORE).contains(&score)
    }

    pub fn get(&self, phase: Phase, category: &str) -> Option<f64> {
        self.0.get(&phase).and_then(|scores| scores.get(category)).copied()
    }

    pub fn set(
        &mut self,
        phase: Phase,
        category: impl Into<String>,
        score: f64,
    ) -> Result<(), ScoreOutOfRange> {
        let category = category.into();
        if !Self::is_valid_score(score) {
            return Err(ScoreOutOfRange {
                phase,
                category,
                score,
            });
        }
        self.0.entry(phase).or_default().insert(category, score);
        Ok(())
    }

    /// Scores recorded for one phase, ordered by category.
    pub fn phase_scores(&self, phase: Phase) -> impl Iterator<Item = (&str, f64)> {
        self.0
            .get(&phase)
            .into_iter()
            .flat_map(|scores| scores.iter().map(|(c, s)| (c.as_str(), *s)))
    }

    pub fn phase_average(&self, phase: Phase) -> Option<f64> {
        let scores: Vec<f64> = self.phase_scores(phase).map(|(_, s)| s).collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    /// Every `(phase, category, score)` entry in phase order.
    pub fn iter(&self) -> impl Iterator<Item = (Phase, &str, f64)> {
        self.0.iter().flat_map(|(phase, scores)| {
            scores
                .iter()
                .map(move |(category, score)| (*phase, category.as_str(), *score))
        })
    }

    pub fn is_within_bounds(&self) -> bool {
        self.iter().all(|(_, _, score)| Self::is_valid_score(score))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|scores| scores.is_empty())
    }
}
