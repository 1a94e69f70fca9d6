//! Salience and utility scoring.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::CandidateAction;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SalienceConfig {
    pub weights: BTreeMap<String, f64>,
    pub low_threshold: f64,
    pub high_threshold: f64,
}

impl Default for SalienceConfig {
    fn default() -> Self {
        Self {
            weights: BTreeMap::from([("delta_u".to_string(), 0.4), ("risk".to_string(), -0.4)]),
            low_threshold: 0.35,
            high_threshold: 0.7,
        }
    }
}

pub fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Weighted sum of domain-labeled components, clamped to [0, 1].
pub fn compute_salience(components: &BTreeMap<String, f64>, config: &SalienceConfig) -> f64 {
    let total = config
        .weights
        .iter()
        .map(|(key, weight)| weight * components.get(key).copied().unwrap_or(0.0))
        .sum();
    clamp01(total)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JWeights {
    pub voi: f64,
    pub optionality: f64,
    pub risk: f64,
    pub fatigue: f64,
}

impl Default for JWeights {
    fn default() -> Self {
        Self {
            voi: 1.0,
            optionality: 0.5,
            risk: 1.0,
            fatigue: 1.0,
        }
    }
}

/// J = Δu + w_voi·voi + w_opt·optionality − cost − w_risk·risk − w_fat·fatigue.
pub fn compute_j_score(action: &CandidateAction, weights: &JWeights) -> f64 {
    action.delta_u + weights.voi * action.voi + weights.optionality * action.optionality
        - action.cost
        - weights.risk * action.risk
        - weights.fatigue * action.fatigue
}

/// Salience floor by notification reason, used when the proposer returns
/// nothing useful.
pub fn reason_salience(reason: &str) -> f64 {
    match reason {
        "mention" | "reply" => 0.65,
        "follow" => 0.45,
        "repost" => 0.3,
        "like" => 0.25,
        _ => 0.1,
    }
}
