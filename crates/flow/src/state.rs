//! Agent state: dedupe maps, cooldowns, consent, pacing windows.
//!
//! The pipeline runner owns writes to this state during a run; the file on
//! disk is the coordination point for out-of-process runners, which race on
//! cooldowns rather than on locks.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::ActionKind;

const PROCESSED_NOTIFICATIONS_CAP: usize = 500;
const PROCESSED_NOTIFICATIONS_RETAIN: usize = 400;
const ACTION_TIMESTAMPS_CAP: usize = 1000;
const ACTION_TIMESTAMPS_RETAIN: usize = 800;
const OPEN_COMMITMENTS_CAP: usize = 50;
const OPEN_COMMITMENTS_RETAIN: usize = 40;

/// A promise extracted from committed text ("I'll link the write-up"),
/// tracked until a later post on the same thread contains a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenCommitment {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub root_uri: String,
    pub target_uri: String,
    pub text_prefix: String,
}

impl OpenCommitment {
    pub fn matches(&self, target_uri: Option<&str>, root_uri: Option<&str>) -> bool {
        if let Some(target) = target_uri {
            if !self.target_uri.is_empty() && self.target_uri == target {
                return true;
            }
        }
        if let Some(root) = root_uri {
            if !self.root_uri.is_empty() && self.root_uri == root {
                return true;
            }
        }
        false
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentPostHash {
    pub hash: String,
    pub at: DateTime<Utc>,
    pub kind: ActionKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentState {
    pub last_action_hashes: BTreeMap<String, String>,
    pub last_action_timestamps: BTreeMap<String, DateTime<Utc>>,
    pub per_user_counts: BTreeMap<String, u32>,
    pub per_user_last_interaction: BTreeMap<String, DateTime<Utc>>,
    pub consented_users: BTreeMap<String, bool>,
    pub cooldowns: BTreeMap<String, DateTime<Utc>>,
    pub processed_notifications: Vec<String>,
    pub last_commit_at: Option<DateTime<Utc>>,
    pub recent_commit_times: Vec<DateTime<Utc>>,
    pub responded_uris: BTreeSet<String>,
    pub notification_poll_hash: Option<String>,
    pub consecutive_unchanged_polls: u32,
    pub per_thread_replies: BTreeMap<String, Vec<DateTime<Utc>>>,
    pub thread_cooldowns: BTreeMap<String, DateTime<Utc>>,
    pub open_commitments: Vec<OpenCommitment>,
    pub recent_post_hashes: Vec<RecentPostHash>,
}

impl AgentState {
    /// `last_commit_at` only moves forward, even if clocks wobble.
    pub fn mark_commit(&mut self, now: DateTime<Utc>) {
        self.last_commit_at = Some(match self.last_commit_at {
            Some(previous) if previous > now => previous,
            _ => now,
        });
    }

    pub fn is_notification_processed(&self, notification_id: &str) -> bool {
        self.processed_notifications
            .iter()
            .any(|id| id == notification_id)
    }

    /// Append to the bounded processed list; returns false for duplicates.
    pub fn mark_notification_processed(&mut self, notification_id: &str) -> bool {
        if self.is_notification_processed(notification_id) {
            return false;
        }
        self.processed_notifications
            .push(notification_id.to_string());
        if self.processed_notifications.len() > PROCESSED_NOTIFICATIONS_CAP {
            let drop = self.processed_notifications.len() - PROCESSED_NOTIFICATIONS_RETAIN;
            self.processed_notifications.drain(..drop);
        }
        true
    }

    /// Track whether successive notification polls saw the same set.
    pub fn record_poll_hash(&mut self, hash: &str) {
        if self.notification_poll_hash.as_deref() == Some(hash) {
            self.consecutive_unchanged_polls += 1;
        } else {
            self.consecutive_unchanged_polls = 0;
            self.notification_poll_hash = Some(hash.to_string());
        }
    }

    pub fn record_consent(&mut self, actor: &str) {
        self.consented_users.insert(actor.to_string(), true);
    }

    pub fn is_consented(&self, actor: &str) -> bool {
        self.consented_users.get(actor).copied().unwrap_or(false)
    }

    pub fn prior_replies_to(&self, actor: &str) -> u32 {
        self.per_user_counts.get(actor).copied().unwrap_or(0)
    }

    /// Drop thread-reply entries older than six hours; empty threads vanish.
    pub fn prune_thread_replies(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(6);
        self.per_thread_replies.retain(|_, replies| {
            replies.retain(|at| *at >= cutoff);
            !replies.is_empty()
        });
    }

    pub fn replies_in_window(&self, root_uri: &str, now: DateTime<Utc>, window: Duration) -> usize {
        let cutoff = now - window;
        self.per_thread_replies
            .get(root_uri)
            .map(|replies| replies.iter().filter(|at| **at >= cutoff).count())
            .unwrap_or(0)
    }

    pub fn push_open_commitment(&mut self, commitment: OpenCommitment) {
        self.open_commitments.push(commitment);
        if self.open_commitments.len() > OPEN_COMMITMENTS_CAP {
            let drop = self.open_commitments.len() - OPEN_COMMITMENTS_RETAIN;
            self.open_commitments.drain(..drop);
        }
    }

    /// Keep the per-target timestamp map bounded, retaining the most recent.
    pub fn cap_action_timestamps(&mut self) {
        if self.last_action_timestamps.len() <= ACTION_TIMESTAMPS_CAP {
            return;
        }
        let mut entries: Vec<(String, DateTime<Utc>)> = self
            .last_action_timestamps
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(ACTION_TIMESTAMPS_RETAIN);
        self.last_action_timestamps = entries.into_iter().collect();
    }
}

/// Single-file JSON store with mkdir-parents + full-rewrite discipline.
/// An unreadable file is treated as fresh state.
#[derive(Debug, Clone)]
pub struct AgentStateStore {
    path: PathBuf,
}

impl AgentStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> AgentState {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return AgentState::default();
        };
        match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "agent state unreadable, starting fresh");
                AgentState::default()
            }
        }
    }

    pub fn save(&self, state: &AgentState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let value = serde_json::to_value(state)?;
        fs::write(&self.path, serde_json::to_string_pretty(&value)?)?;
        Ok(())
    }
}
