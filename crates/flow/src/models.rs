//! Data model for the pipeline: actions, drafts, observations, run traces.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What a candidate action does to the outside world.
///
/// `Ignore` and `Queue` never commit; everything else is dispatched through
/// the commit handler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Reply,
    Quote,
    Post,
    Follow,
    Mute,
    Block,
    Like,
    Ignore,
    Queue,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Reply => "reply",
            ActionKind::Quote => "quote",
            ActionKind::Post => "post",
            ActionKind::Follow => "follow",
            ActionKind::Mute => "mute",
            ActionKind::Block => "block",
            ActionKind::Like => "like",
            ActionKind::Ignore => "ignore",
            ActionKind::Queue => "queue",
        }
    }

    /// Kinds that carry user-visible text and go through the length and
    /// duplicate-text checks.
    pub fn is_text_bearing(self) -> bool {
        matches!(self, ActionKind::Post | ActionKind::Reply | ActionKind::Quote)
    }

    pub fn has_side_effect(self) -> bool {
        !matches!(self, ActionKind::Ignore | ActionKind::Queue)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A post reference: stable URI plus content hash, as the platforms use them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRef {
    pub uri: String,
    pub cid: String,
}

/// Root/parent pair required to thread a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub root: PostRef,
    pub parent: PostRef,
}

/// Actor identity as platforms report it; either field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorRef {
    pub handle: Option<String>,
    pub did: Option<String>,
}

impl ActorRef {
    /// Preferred stable id: handle first, did as fallback.
    pub fn id(&self) -> Option<&str> {
        self.handle.as_deref().or(self.did.as_deref())
    }
}

/// One inbound notification from an interaction surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Notification {
    pub uri: String,
    pub cid: Option<String>,
    pub reason: String,
    pub author: ActorRef,
    pub text: Option<String>,
    pub indexed_at: Option<String>,
    pub is_read: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorProfile {
    pub handle: Option<String>,
    pub did: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
}

/// Context the proposer and committers need beyond the action itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionMetadata {
    pub notification_id: Option<String>,
    pub cid: Option<String>,
    pub actor: Option<String>,
    pub reply_to: Option<ReplyRef>,
    pub root_uri: Option<String>,
    pub quote_uri: Option<String>,
    /// Set by the proposer when a meta-sounding post intentionally ships
    /// without a link.
    pub artifact_ok: bool,
}

/// A proposed action with its utility components, before scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateAction {
    pub kind: ActionKind,
    pub target_uri: Option<String>,
    pub text: Option<String>,
    pub intent: String,
    pub notes: String,
    pub constraints: Vec<String>,
    pub risk_flags: Vec<String>,
    pub abort_if: Vec<String>,
    pub confidence: f64,
    pub salience: f64,
    pub delta_u: f64,
    pub voi: f64,
    pub optionality: f64,
    pub cost: f64,
    pub risk: f64,
    pub fatigue: f64,
    pub metadata: ActionMetadata,
}

impl CandidateAction {
    /// The do-nothing fallback; every candidate list must contain one.
    pub fn ignore(target_uri: Option<String>, notes: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Ignore,
            target_uri,
            text: None,
            intent: "ignore".to_string(),
            notes: notes.into(),
            constraints: Vec::new(),
            risk_flags: Vec::new(),
            abort_if: Vec::new(),
            confidence: 0.0,
            salience: 0.0,
            delta_u: 0.0,
            voi: 0.0,
            optionality: 0.0,
            cost: 0.0,
            risk: 0.0,
            fatigue: 0.0,
            metadata: ActionMetadata::default(),
        }
    }

    /// Rewrite this candidate into a queue action with the same payload.
    pub fn into_queue(mut self, notes: impl Into<String>) -> Self {
        self.kind = ActionKind::Queue;
        self.notes = notes.into();
        self
    }

    pub fn root_uri(&self) -> Option<&str> {
        self.metadata.root_uri.as_deref()
    }
}

/// A candidate plus its computed J score.
#[derive(Debug, Clone)]
pub struct ScoredAction {
    pub action: CandidateAction,
    pub j_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    Draft,
    Queued,
    Committed,
    Aborted,
    Error,
}

impl DraftStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DraftStatus::Draft => "draft",
            DraftStatus::Queued => "queued",
            DraftStatus::Committed => "committed",
            DraftStatus::Aborted => "aborted",
            DraftStatus::Error => "error",
        }
    }

    /// Terminal drafts never transition again; the GC sweep may purge them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DraftStatus::Committed | DraftStatus::Aborted | DraftStatus::Error
        )
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The reversible, persisted record of a proposed side effect.  Drafts are
/// written to the outbox before any commit handler runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: String,
    pub kind: ActionKind,
    pub target_uri: Option<String>,
    pub text: Option<String>,
    pub intent: String,
    pub constraints: Vec<String>,
    pub confidence: f64,
    pub salience: f64,
    pub risk_flags: Vec<String>,
    pub abort_if: Vec<String>,
    pub metadata: ActionMetadata,
    #[serde(default)]
    pub queue_reason: Option<String>,
    #[serde(default)]
    pub abort_reason: Option<String>,
    #[serde(default)]
    pub commit_uri: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: DraftStatus,
}

impl Draft {
    /// Thread root this draft belongs to; falls back to the target itself.
    pub fn root_uri(&self) -> Option<&str> {
        self.metadata
            .root_uri
            .as_deref()
            .or(self.target_uri.as_deref())
    }
}

/// Verdict of the preflight gate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightResult {
    pub passed: bool,
    pub reasons: Vec<String>,
    pub suggested_edits: Vec<String>,
    pub require_human: bool,
    pub need_more_context: bool,
}

/// Everything the observe step gathered in one pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Observation {
    pub notifications: Vec<Notification>,
    pub threads: Vec<serde_json::Value>,
    pub profiles: Vec<ActorProfile>,
    pub reply_refs: BTreeMap<String, ReplyRef>,
    pub consent_updates: BTreeMap<String, bool>,
    pub need_more_context: bool,
    pub skip_poll_suggested: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitResult {
    pub success: bool,
    pub external_uri: Option<String>,
    pub error: Option<String>,
}

impl CommitResult {
    pub fn ok(external_uri: Option<String>) -> Self {
        Self {
            success: true,
            external_uri,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            external_uri: None,
            error: Some(error.into()),
        }
    }
}

/// One line in the run trace, appended after state persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub loop_iter: u32,
    pub tools_called: Vec<String>,
    pub chosen_action: Option<String>,
    pub j_components: BTreeMap<String, f64>,
    pub salience_components: BTreeMap<String, f64>,
    pub preflight: Option<PreflightResult>,
    pub commit_result: Option<CommitResult>,
    pub abort_reason: Option<String>,
    /// Grapheme length of committed text, feeding output drift detection.
    #[serde(default)]
    pub output_graphemes: Option<usize>,
}

fn sha256_hex16(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Coarse dedupe hash over normalized text.
pub fn hash_text(text: &str) -> String {
    sha256_hex16(text.trim().to_lowercase().as_bytes())
}

pub fn hash_target(target_uri: &str) -> String {
    sha256_hex16(target_uri.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_hash_is_case_and_whitespace_insensitive() {
        assert_eq!(hash_text("  Hello World "), hash_text("hello world"));
        assert_ne!(hash_text("hello world"), hash_text("hello worlds"));
        assert_eq!(hash_text("x").len(), 16);
    }

    #[test]
    fn action_kind_serializes_lowercase() {
        let json = serde_json::to_string(&ActionKind::Reply).unwrap();
        assert_eq!(json, "\"reply\"");
        let back: ActionKind = serde_json::from_str("\"queue\"").unwrap();
        assert_eq!(back, ActionKind::Queue);
    }

    #[test]
    fn draft_root_uri_falls_back_to_target() {
        let mut draft = Draft {
            id: "abc".to_string(),
            kind: ActionKind::Reply,
            target_uri: Some("at://x/post/1".to_string()),
            text: None,
            intent: String::new(),
            constraints: Vec::new(),
            confidence: 0.0,
            salience: 0.0,
            risk_flags: Vec::new(),
            abort_if: Vec::new(),
            metadata: ActionMetadata::default(),
            queue_reason: None,
            abort_reason: None,
            commit_uri: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            status: DraftStatus::Draft,
        };
        assert_eq!(draft.root_uri(), Some("at://x/post/1"));

        draft.metadata.root_uri = Some("at://x/post/root".to_string());
        assert_eq!(draft.root_uri(), Some("at://x/post/root"));
    }
}
