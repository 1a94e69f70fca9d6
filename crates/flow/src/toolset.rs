//! The toolset contract plus scoring, selection, and draft construction.
//!
//! Implementations supply the platform-facing pieces (observe, propose,
//! commit); the decision math lives here so every surface selects actions
//! the same way.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use magenta_config::PolicyConfig;

use crate::models::{CandidateAction, CommitResult, Draft, DraftStatus, Observation, ScoredAction};
use crate::outbox::new_draft_id;
use crate::salience::{JWeights, SalienceConfig, compute_j_score};
use crate::state::AgentState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionPolicy {
    pub salience: SalienceConfig,
    pub j_weights: JWeights,
    pub low_action_threshold: f64,
    pub high_action_threshold: f64,
    pub queue_threshold: f64,
    pub epsilon: f64,
    pub temperature: f64,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            salience: SalienceConfig::default(),
            j_weights: JWeights::default(),
            low_action_threshold: 0.0,
            high_action_threshold: 0.2,
            queue_threshold: 0.05,
            epsilon: 0.15,
            temperature: 0.8,
        }
    }
}

impl DecisionPolicy {
    pub fn from_config(policy: &PolicyConfig) -> Self {
        let mut salience = SalienceConfig::default();
        salience.low_threshold = policy.low_salience_threshold;
        salience.high_threshold = policy.high_salience_threshold;
        Self {
            salience,
            epsilon: policy.epsilon,
            temperature: policy.temperature,
            ..Self::default()
        }
    }
}

/// Salience levels at which a committed action is worth remembering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPolicy {
    pub core_threshold: f64,
    pub summary_threshold: f64,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            core_threshold: 0.7,
            summary_threshold: 0.45,
        }
    }
}

/// Platform-facing operations the pipeline runner drives.
///
/// The contract degrades instead of failing: a broken observation comes back
/// empty, a broken proposal comes back as a lone ignore.  Only `commit`
/// reports errors, and it does so through `CommitResult`.
#[async_trait]
pub trait Toolset: Send + Sync {
    fn policy(&self) -> &DecisionPolicy;

    fn memory_policy(&self) -> &MemoryPolicy;

    async fn observe(&self, _state: &mut AgentState) -> Observation {
        Observation::default()
    }

    async fn propose_actions(
        &self,
        _observation: &Observation,
        _state: &mut AgentState,
    ) -> Vec<CandidateAction> {
        vec![CandidateAction::ignore(None, "default ignore")]
    }

    async fn commit(&self, draft: &Draft) -> CommitResult;

    /// Out-of-band memory hooks, fired after high-salience commits.
    async fn write_event_summary(&self, _summary: &str) {}

    async fn update_core_memory(&self, _patch: &str) {}
}

pub fn score_actions(actions: &[CandidateAction], policy: &DecisionPolicy) -> Vec<ScoredAction> {
    actions
        .iter()
        .map(|action| ScoredAction {
            j_score: compute_j_score(action, &policy.j_weights),
            action: action.clone(),
        })
        .collect()
}

/// ε-greedy over softmax(J/T); argmax when the weights collapse.
pub fn pick_action(actions: &[CandidateAction], policy: &DecisionPolicy) -> ScoredAction {
    let scored = score_actions(actions, policy);
    if scored.is_empty() {
        return ScoredAction {
            action: CandidateAction::ignore(None, "fallback ignore"),
            j_score: 0.0,
        };
    }

    let mut rng = rand::thread_rng();

    if policy.epsilon > 0.0 && rng.r#gen::<f64>() < policy.epsilon {
        let index = rng.gen_range(0..scored.len());
        return scored[index].clone();
    }

    if policy.temperature > 0.0 {
        let weights: Vec<f64> = scored
            .iter()
            .map(|action| (action.j_score / policy.temperature).exp())
            .collect();
        let total: f64 = weights.iter().sum();
        if total > 0.0 && total.is_finite() {
            let pick = rng.r#gen::<f64>() * total;
            let mut upto = 0.0;
            for (action, weight) in scored.iter().zip(&weights) {
                upto += weight;
                if upto >= pick {
                    return action.clone();
                }
            }
        }
    }

    argmax(scored)
}

fn argmax(scored: Vec<ScoredAction>) -> ScoredAction {
    let mut best: Option<ScoredAction> = None;
    for action in scored {
        let replace = match &best {
            Some(current) => {
                matches!(
                    action
                        .j_score
                        .partial_cmp(&current.j_score)
                        .unwrap_or(Ordering::Equal),
                    Ordering::Greater
                )
            }
            None => true,
        };
        if replace {
            best = Some(action);
        }
    }
    best.unwrap_or_else(|| ScoredAction {
        action: CandidateAction::ignore(None, "fallback ignore"),
        j_score: 0.0,
    })
}

pub fn create_draft(action: &CandidateAction) -> Draft {
    let now = Utc::now();
    Draft {
        id: new_draft_id(),
        kind: action.kind,
        target_uri: action.target_uri.clone(),
        text: action.text.clone(),
        intent: if action.intent.is_empty() {
            action.notes.clone()
        } else {
            action.intent.clone()
        },
        constraints: action.constraints.clone(),
        confidence: action.confidence,
        salience: action.salience,
        risk_flags: action.risk_flags.clone(),
        abort_if: action.abort_if.clone(),
        metadata: action.metadata.clone(),
        queue_reason: None,
        abort_reason: None,
        commit_uri: None,
        created_at: now,
        updated_at: now,
        status: DraftStatus::Draft,
    }
}
