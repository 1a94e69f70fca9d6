//! Draft validation before committing side effects.
//!
//! Pure accumulation of failure reasons: every check runs, nothing short
//! circuits, and the caller gets the full list.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use unicode_segmentation::UnicodeSegmentation;

use magenta_config::PolicyConfig;

use crate::models::{Draft, PreflightResult, hash_text};
use crate::state::AgentState;

/// Post text matching one of these without linking an artifact reads as
/// navel-gazing; the gate demands a URL or an explicit override.
const META_MARKERS: &[&str] = &[
    "system matured",
    "lesson learned",
    "broke loop",
    "signal loop",
    "context",
    "pressure",
    "maintenance",
    "uncanny",
    "anxiety",
    "social signal",
    "interoception",
    "hypercontext",
];

#[derive(Debug, Clone)]
pub struct PreflightPolicy {
    pub min_confidence: f64,
    pub max_post_length: usize,
    pub cooldown_seconds: i64,
    pub dedupe_ttl_hours: i64,
    pub require_human_on_risk: Vec<String>,
    pub require_fresh_sync: bool,
    pub sync_state_max_age_seconds: i64,
    pub sync_state_path: PathBuf,
}

impl Default for PreflightPolicy {
    fn default() -> Self {
        Self {
            min_confidence: 0.55,
            max_post_length: 300,
            cooldown_seconds: 30,
            dedupe_ttl_hours: 24,
            require_human_on_risk: vec![
                "harassment".to_string(),
                "personal_data".to_string(),
                "political".to_string(),
                "escalation".to_string(),
                "high".to_string(),
            ],
            require_fresh_sync: true,
            sync_state_max_age_seconds: 300,
            sync_state_path: PathBuf::from("state/sync_state.json"),
        }
    }
}

impl PreflightPolicy {
    pub fn from_config(policy: &PolicyConfig, state_dir: &str) -> Self {
        Self {
            min_confidence: policy.min_confidence,
            max_post_length: policy.max_post_length,
            cooldown_seconds: policy.cooldown_seconds as i64,
            dedupe_ttl_hours: policy.dedupe_ttl_hours as i64,
            require_fresh_sync: policy.require_fresh_sync,
            sync_state_path: PathBuf::from(state_dir).join("sync_state.json"),
            ..Self::default()
        }
    }
}

pub fn grapheme_len(text: &str) -> usize {
    text.graphemes(true).count()
}

fn check_fresh_sync(policy: &PreflightPolicy, now: DateTime<Utc>, reasons: &mut Vec<String>) {
    let Ok(raw) = fs::read_to_string(&policy.sync_state_path) else {
        reasons.push("sync_state_missing".to_string());
        return;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
        reasons.push("sync_state_read_failed".to_string());
        return;
    };
    let Some(timestamp) = value.get("timestamp").and_then(|v| v.as_str()) else {
        reasons.push("sync_state_missing_timestamp".to_string());
        return;
    };
    match DateTime::parse_from_rfc3339(timestamp) {
        Ok(synced_at) => {
            let age = now.signed_duration_since(synced_at.with_timezone(&Utc));
            if age.num_seconds() > policy.sync_state_max_age_seconds {
                reasons.push("sync_state_stale".to_string());
            }
        }
        Err(_) => reasons.push("sync_state_read_failed".to_string()),
    }
}

pub fn validate_draft(draft: &Draft, state: &AgentState, policy: &PreflightPolicy) -> PreflightResult {
    let now = Utc::now();
    let mut reasons = Vec::new();
    let mut suggested_edits = Vec::new();
    let mut require_human = false;

    if policy.require_fresh_sync {
        check_fresh_sync(policy, now, &mut reasons);
    }

    if draft.confidence < policy.min_confidence {
        reasons.push("confidence_below_threshold".to_string());
    }

    if draft.kind.is_text_bearing() {
        match draft.text.as_deref() {
            None => reasons.push("missing_text".to_string()),
            Some(text) if text.trim().is_empty() => reasons.push("missing_text".to_string()),
            Some(text) => {
                if grapheme_len(text) > policy.max_post_length {
                    reasons.push("text_too_long".to_string());
                    suggested_edits.push("shorten_text".to_string());
                }
                if let Some(quote_uri) = draft.metadata.quote_uri.as_deref() {
                    let suffix = format!("\n\n🔗 {quote_uri}");
                    if grapheme_len(text) + grapheme_len(&suffix) > policy.max_post_length {
                        reasons.push("text_too_long_with_quote".to_string());
                        suggested_edits.push("shorten_text".to_string());
                    }
                }
            }
        }
    }

    if matches!(
        draft.kind,
        crate::models::ActionKind::Post | crate::models::ActionKind::Quote
    ) {
        if let Some(text) = draft.text.as_deref() {
            let lowered = text.to_lowercase();
            let has_url = lowered.contains("http://") || lowered.contains("https://");
            let is_meta = META_MARKERS.iter().any(|marker| lowered.contains(marker));
            if is_meta && !has_url && !draft.metadata.artifact_ok {
                reasons.push("meta_needs_artifact".to_string());
            }
        }
    }

    if draft.kind.is_text_bearing() {
        if let Some(text) = draft.text.as_deref() {
            let text_hash = hash_text(text);
            let window = Duration::hours(2);
            let duplicate = state
                .recent_post_hashes
                .iter()
                .any(|entry| entry.hash == text_hash && now.signed_duration_since(entry.at) <= window);
            if duplicate {
                reasons.push("duplicate_recent_post".to_string());
            }
        }
    }

    for risk in &policy.require_human_on_risk {
        if draft.risk_flags.iter().any(|flag| flag == risk) {
            require_human = true;
            reasons.push(format!("risk_flag:{risk}"));
        }
    }

    if let Some(target) = draft.target_uri.as_deref() {
        if let Some(last_at) = state.last_action_timestamps.get(target) {
            let ttl = Duration::hours(policy.dedupe_ttl_hours);
            if now.signed_duration_since(*last_at) <= ttl {
                reasons.push("duplicate_target_recent".to_string());
            }
        } else if state.last_action_hashes.contains_key(target) {
            reasons.push("duplicate_target".to_string());
        }
    }

    if let Some(notification_id) = draft.metadata.notification_id.as_deref() {
        if state.is_notification_processed(notification_id) {
            reasons.push("notification_already_processed".to_string());
        }
    }

    if let Some(last_commit) = state.last_commit_at {
        if policy.cooldown_seconds > 0
            && now.signed_duration_since(last_commit).num_seconds() < policy.cooldown_seconds
        {
            reasons.push("cooldown_active".to_string());
        }
    }

    if let Some(until) = state.cooldowns.get("global") {
        if now < *until {
            reasons.push("burst_cooldown_active".to_string());
        }
    }

    // AI-to-AI pacing: never more than three replies into the same thread
    // inside half an hour.
    if let Some(root_uri) = draft.root_uri() {
        let cooling = state
            .thread_cooldowns
            .get(root_uri)
            .is_some_and(|until| now < *until);
        if cooling {
            reasons.push("thread_pacing_cooldown".to_string());
        } else if state.replies_in_window(root_uri, now, Duration::minutes(30)) >= 3 {
            reasons.push("thread_pacing_cooldown".to_string());
        }
    }

    PreflightResult {
        passed: reasons.is_empty() && !require_human,
        reasons,
        suggested_edits,
        require_human,
        need_more_context: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionKind, ActionMetadata, Draft, DraftStatus};
    use crate::state::RecentPostHash;

    fn policy_without_sync() -> PreflightPolicy {
        PreflightPolicy {
            require_fresh_sync: false,
            ..PreflightPolicy::default()
        }
    }

    fn draft(kind: ActionKind, text: Option<&str>) -> Draft {
        Draft {
            id: "abcdef123456".to_string(),
            kind,
            target_uri: Some("at://x/post/1".to_string()),
            text: text.map(str::to_string),
            intent: "test".to_string(),
            constraints: Vec::new(),
            confidence: 0.8,
            salience: 0.75,
            risk_flags: Vec::new(),
            abort_if: Vec::new(),
            metadata: ActionMetadata {
                notification_id: Some("at://x/post/1".to_string()),
                ..ActionMetadata::default()
            },
            queue_reason: None,
            abort_reason: None,
            commit_uri: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            status: DraftStatus::Draft,
        }
    }

    #[test]
    fn clean_reply_passes() {
        let result = validate_draft(
            &draft(ActionKind::Reply, Some("Hi Alice — got it.")),
            &AgentState::default(),
            &policy_without_sync(),
        );
        assert!(result.passed, "unexpected reasons: {:?}", result.reasons);
    }

    #[test]
    fn low_confidence_fails() {
        let mut d = draft(ActionKind::Reply, Some("hello"));
        d.confidence = 0.2;
        let result = validate_draft(&d, &AgentState::default(), &policy_without_sync());
        assert!(result.reasons.contains(&"confidence_below_threshold".to_string()));
    }

    #[test]
    fn grapheme_length_counts_clusters_not_bytes() {
        // 301 family emoji: thousands of bytes but 301 graphemes.
        let text = "👨‍👩‍👧‍👦".repeat(301);
        let d = draft(ActionKind::Post, Some(&text));
        let result = validate_draft(&d, &AgentState::default(), &policy_without_sync());
        assert!(result.reasons.contains(&"text_too_long".to_string()));
        assert!(!result.reasons.contains(&"text_too_long_with_quote".to_string()));
        assert!(result.suggested_edits.contains(&"shorten_text".to_string()));

        let short = draft(ActionKind::Post, Some(&"👨‍👩‍👧‍👦".repeat(299)));
        let result = validate_draft(&short, &AgentState::default(), &policy_without_sync());
        assert!(!result.reasons.contains(&"text_too_long".to_string()));
    }

    #[test]
    fn quote_suffix_counts_against_length() {
        let mut d = draft(ActionKind::Quote, Some(&"x".repeat(290)));
        d.metadata.quote_uri = Some("at://x/post/quoted".to_string());
        let result = validate_draft(&d, &AgentState::default(), &policy_without_sync());
        assert!(result.reasons.contains(&"text_too_long_with_quote".to_string()));
        assert!(!result.reasons.contains(&"text_too_long".to_string()));
    }

    #[test]
    fn meta_post_without_artifact_fails() {
        let d = draft(ActionKind::Post, Some("Lesson learned about my own loops."));
        let result = validate_draft(&d, &AgentState::default(), &policy_without_sync());
        assert!(result.reasons.contains(&"meta_needs_artifact".to_string()));

        // A URL satisfies the artifact requirement.
        let with_url = draft(
            ActionKind::Post,
            Some("Lesson learned, write-up at https://example.com/notes"),
        );
        let result = validate_draft(&with_url, &AgentState::default(), &policy_without_sync());
        assert!(!result.reasons.contains(&"meta_needs_artifact".to_string()));

        // So does an explicit override.
        let mut overridden = draft(ActionKind::Post, Some("lesson learned"));
        overridden.metadata.artifact_ok = true;
        let result = validate_draft(&overridden, &AgentState::default(), &policy_without_sync());
        assert!(!result.reasons.contains(&"meta_needs_artifact".to_string()));

        // Replies are exempt.
        let reply = draft(ActionKind::Reply, Some("lesson learned"));
        let result = validate_draft(&reply, &AgentState::default(), &policy_without_sync());
        assert!(!result.reasons.contains(&"meta_needs_artifact".to_string()));
    }

    #[test]
    fn duplicate_recent_text_fails_within_two_hours() {
        let mut state = AgentState::default();
        state.recent_post_hashes.push(RecentPostHash {
            hash: hash_text("Same thought again"),
            at: Utc::now() - Duration::minutes(30),
            kind: ActionKind::Post,
        });
        let d = draft(ActionKind::Post, Some("same thought again"));
        let result = validate_draft(&d, &state, &policy_without_sync());
        assert!(result.reasons.contains(&"duplicate_recent_post".to_string()));

        // Outside the window the same text is fine.
        let mut state = AgentState::default();
        state.recent_post_hashes.push(RecentPostHash {
            hash: hash_text("Same thought again"),
            at: Utc::now() - Duration::hours(3),
            kind: ActionKind::Post,
        });
        let result = validate_draft(&d, &state, &policy_without_sync());
        assert!(!result.reasons.contains(&"duplicate_recent_post".to_string()));
    }

    #[test]
    fn risk_flags_route_to_human() {
        let mut d = draft(ActionKind::Reply, Some("hello"));
        d.risk_flags.push("harassment".to_string());
        let result = validate_draft(&d, &AgentState::default(), &policy_without_sync());
        assert!(result.require_human);
        assert!(!result.passed);
        assert!(result.reasons.contains(&"risk_flag:harassment".to_string()));
    }

    #[test]
    fn target_dedupe_prefers_time_bounded_check() {
        let mut state = AgentState::default();
        state.last_action_timestamps.insert(
            "at://x/post/1".to_string(),
            Utc::now() - Duration::hours(2),
        );
        let d = draft(ActionKind::Reply, Some("hello"));
        let result = validate_draft(&d, &state, &policy_without_sync());
        assert!(result.reasons.contains(&"duplicate_target_recent".to_string()));

        // Hash-only record falls back to the coarse check.
        let mut state = AgentState::default();
        state
            .last_action_hashes
            .insert("at://x/post/1".to_string(), "deadbeef".to_string());
        let result = validate_draft(&d, &state, &policy_without_sync());
        assert!(result.reasons.contains(&"duplicate_target".to_string()));
    }

    #[test]
    fn processed_notification_fails() {
        let mut state = AgentState::default();
        state.mark_notification_processed("at://x/post/1");
        let d = draft(ActionKind::Reply, Some("hello"));
        let result = validate_draft(&d, &state, &policy_without_sync());
        assert!(
            result
                .reasons
                .contains(&"notification_already_processed".to_string())
        );
    }

    #[test]
    fn commit_cooldown_blocks_back_to_back_commits() {
        let mut state = AgentState::default();
        state.last_commit_at = Some(Utc::now() - Duration::seconds(10));
        let mut d = draft(ActionKind::Reply, Some("hello"));
        d.target_uri = Some("at://x/post/2".to_string());
        d.metadata.notification_id = Some("at://x/post/2".to_string());
        let result = validate_draft(&d, &state, &policy_without_sync());
        assert!(result.reasons.contains(&"cooldown_active".to_string()));
        assert!(!result.passed);
    }

    #[test]
    fn burst_cooldown_blocks_until_expiry() {
        let mut state = AgentState::default();
        state
            .cooldowns
            .insert("global".to_string(), Utc::now() + Duration::hours(2));
        let d = draft(ActionKind::Reply, Some("hello"));
        let result = validate_draft(&d, &state, &policy_without_sync());
        assert!(result.reasons.contains(&"burst_cooldown_active".to_string()));
    }

    #[test]
    fn thread_pacing_triggers_on_cooldown_or_window() {
        let mut d = draft(ActionKind::Reply, Some("hello"));
        d.metadata.root_uri = Some("at://r/1".to_string());

        let mut state = AgentState::default();
        state
            .thread_cooldowns
            .insert("at://r/1".to_string(), Utc::now() + Duration::minutes(30));
        let result = validate_draft(&d, &state, &policy_without_sync());
        assert!(result.reasons.contains(&"thread_pacing_cooldown".to_string()));

        let mut state = AgentState::default();
        let now = Utc::now();
        state.per_thread_replies.insert(
            "at://r/1".to_string(),
            vec![
                now - Duration::minutes(5),
                now - Duration::minutes(10),
                now - Duration::minutes(20),
            ],
        );
        let result = validate_draft(&d, &state, &policy_without_sync());
        assert_eq!(
            result
                .reasons
                .iter()
                .filter(|r| *r == "thread_pacing_cooldown")
                .count(),
            1
        );
    }

    #[test]
    fn fresh_sync_check_reads_snapshot_age() {
        let dir = tempfile::tempdir().unwrap();
        let sync_path = dir.path().join("sync_state.json");
        let policy = PreflightPolicy {
            sync_state_path: sync_path.clone(),
            ..PreflightPolicy::default()
        };
        let d = draft(ActionKind::Reply, Some("hello"));

        // Missing file.
        let result = validate_draft(&d, &AgentState::default(), &policy);
        assert!(result.reasons.contains(&"sync_state_missing".to_string()));

        // Fresh snapshot passes.
        fs::write(
            &sync_path,
            serde_json::json!({"timestamp": Utc::now().to_rfc3339()}).to_string(),
        )
        .unwrap();
        let result = validate_draft(&d, &AgentState::default(), &policy);
        assert!(!result.reasons.iter().any(|r| r.starts_with("sync_state")));

        // Stale snapshot fails.
        let stale = (Utc::now() - Duration::minutes(10)).to_rfc3339();
        fs::write(
            &sync_path,
            serde_json::json!({"timestamp": stale}).to_string(),
        )
        .unwrap();
        let result = validate_draft(&d, &AgentState::default(), &policy);
        assert!(result.reasons.contains(&"sync_state_stale".to_string()));

        // Unparseable snapshot fails distinctly.
        fs::write(&sync_path, "{broken").unwrap();
        let result = validate_draft(&d, &AgentState::default(), &policy);
        assert!(result.reasons.contains(&"sync_state_read_failed".to_string()));
    }
}
