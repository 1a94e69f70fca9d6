//! Single-run orchestration: observe → decide → draft → preflight → commit.
//!
//! A run produces at most one commit, no matter how many candidates the
//! proposer returns.  Aborts are recorded in the outbox and the run trace;
//! nothing propagates to the caller except store failures.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    ActionKind, CandidateAction, Draft, DraftStatus, Observation, TelemetryEvent, hash_target,
    hash_text,
};
use crate::outbox::OutboxStore;
use crate::preflight::{PreflightPolicy, grapheme_len, validate_draft};
use crate::state::{AgentState, AgentStateStore, OpenCommitment, RecentPostHash};
use crate::telemetry::TelemetryStore;
use crate::toolset::{Toolset, create_draft, pick_action};

/// Phrases that turn committed text into a tracked promise.
const COMMITMENT_MARKERS: &[&str] = &[
    "i will",
    "i'll",
    "will link",
    "writing up",
    "i promise",
    "as promised",
];

const RECENT_POST_HASHES_CAP: usize = 100;

pub struct RunDeps<'a> {
    pub toolset: &'a dyn Toolset,
    pub state_store: &'a AgentStateStore,
    pub telemetry: &'a TelemetryStore,
    pub outbox: &'a OutboxStore,
    pub preflight: &'a PreflightPolicy,
}

fn new_run_id() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_string()
}

struct RunTrace {
    run_id: String,
    loop_iter: u32,
    tools_called: Vec<String>,
}

impl RunTrace {
    fn new() -> Self {
        Self {
            run_id: new_run_id(),
            loop_iter: 1,
            tools_called: Vec::new(),
        }
    }

    fn called(&mut self, tool: &str) {
        self.tools_called.push(tool.to_string());
    }

    fn event(&self) -> TelemetryEvent {
        TelemetryEvent {
            timestamp: Utc::now(),
            run_id: self.run_id.clone(),
            loop_iter: self.loop_iter,
            tools_called: self.tools_called.clone(),
            chosen_action: None,
            j_components: BTreeMap::new(),
            salience_components: BTreeMap::new(),
            preflight: None,
            commit_result: None,
            abort_reason: None,
            output_graphemes: None,
        }
    }

    fn abort_event(&self, reason: &str) -> TelemetryEvent {
        let mut event = self.event();
        event.abort_reason = Some(reason.to_string());
        event
    }
}

fn decision_components(event: &mut TelemetryEvent, kind: ActionKind, j_score: f64, salience: f64) {
    event.chosen_action = Some(kind.as_str().to_string());
    event.j_components.insert("J".to_string(), j_score);
    event.salience_components.insert("S'".to_string(), salience);
}

/// Queue runs replay stored drafts, so there is no J score to report.
fn queue_components(event: &mut TelemetryEvent, draft: &Draft) {
    event.chosen_action = Some(draft.kind.as_str().to_string());
    event
        .salience_components
        .insert("S'".to_string(), draft.salience);
}

/// Tokens in a profile description or handle that mark the actor as
/// automated; bots are exempt from the consent guardrail.
const BOT_DESCRIPTION_TOKENS: &[&str] = &["bot", "agent", "ai", "automated"];
const BOT_HANDLE_TOKENS: &[&str] = &["bot", "agent", "ai"];

fn actor_is_bot(actor: &str, observation: &Observation) -> bool {
    let handle = actor.to_lowercase();
    if BOT_HANDLE_TOKENS.iter().any(|token| handle.contains(token)) {
        return true;
    }
    observation
        .profiles
        .iter()
        .filter(|profile| {
            profile.handle.as_deref() == Some(actor) || profile.did.as_deref() == Some(actor)
        })
        .filter_map(|profile| profile.description.as_deref())
        .any(|description| {
            let lowered = description.to_lowercase();
            BOT_DESCRIPTION_TOKENS
                .iter()
                .any(|token| lowered.contains(token))
        })
}

/// Humans who have not opted in get at most one reply.  After that, only
/// ignore/queue candidates survive — unless that would empty the list.
fn apply_consent_filter(
    actions: Vec<CandidateAction>,
    observation: &Observation,
    state: &AgentState,
) -> Vec<CandidateAction> {
    let Some(top) = observation.notifications.first() else {
        return actions;
    };
    let Some(actor) = top.author.id() else {
        return actions;
    };
    if actor_is_bot(actor, observation)
        || state.is_consented(actor)
        || state.prior_replies_to(actor) < 1
    {
        return actions;
    }

    let filtered: Vec<CandidateAction> = actions
        .iter()
        .filter(|action| matches!(action.kind, ActionKind::Ignore | ActionKind::Queue))
        .cloned()
        .collect();
    if filtered.is_empty() { actions } else { filtered }
}

fn should_queue_for_commitments(action: &CandidateAction, state: &AgentState) -> bool {
    if state.open_commitments.is_empty() {
        return false;
    }
    if !matches!(action.kind, ActionKind::Reply | ActionKind::Quote) {
        return true;
    }
    let target = action.target_uri.as_deref();
    let root = action.metadata.root_uri.as_deref();
    !state
        .open_commitments
        .iter()
        .any(|commitment| commitment.matches(target, root))
}

fn record_commitment_if_present(draft: &Draft, state: &mut AgentState) {
    let Some(text) = draft.text.as_deref() else {
        return;
    };
    let lowered = text.to_lowercase();
    if !COMMITMENT_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return;
    }
    state.push_open_commitment(OpenCommitment {
        id: Uuid::new_v4().simple().to_string()[..10].to_string(),
        created_at: Utc::now(),
        root_uri: draft.metadata.root_uri.clone().unwrap_or_default(),
        target_uri: draft.target_uri.clone().unwrap_or_default(),
        text_prefix: text.chars().take(200).collect(),
    });
}

fn resolve_commitments_if_present(draft: &Draft, state: &mut AgentState) {
    let Some(text) = draft.text.as_deref() else {
        return;
    };
    if !text.contains("http://") && !text.contains("https://") {
        return;
    }
    let target = draft.target_uri.as_deref();
    let root = draft.metadata.root_uri.as_deref();
    state
        .open_commitments
        .retain(|commitment| !commitment.matches(target, root));
}

/// Everything that becomes true once a commit lands: dedupe records, pacing
/// windows, burst and thread cooldowns, commitment bookkeeping.  Saves the
/// state before returning; telemetry is the caller's job.
fn apply_commit_state(draft: &Draft, state: &mut AgentState, store: &AgentStateStore) -> Result<()> {
    let now = Utc::now();
    let key = draft
        .target_uri
        .clone()
        .unwrap_or_else(|| draft.id.clone());
    state.last_action_hashes.insert(key.clone(), hash_target(&key));
    state.last_action_timestamps.insert(key, now);
    state.mark_commit(now);

    if let Some(notification_id) = draft.metadata.notification_id.as_deref() {
        state.mark_notification_processed(notification_id);
    }

    if draft.kind.is_text_bearing() {
        if let Some(text) = draft.text.as_deref() {
            state.recent_post_hashes.push(RecentPostHash {
                hash: hash_text(text),
                at: now,
                kind: draft.kind,
            });
            let cutoff = now - Duration::hours(24);
            state.recent_post_hashes.retain(|entry| entry.at >= cutoff);
            if state.recent_post_hashes.len() > RECENT_POST_HASHES_CAP {
                let drop = state.recent_post_hashes.len() - RECENT_POST_HASHES_CAP;
                state.recent_post_hashes.drain(..drop);
            }
        }
    }

    record_commitment_if_present(draft, state);
    resolve_commitments_if_present(draft, state);
    state.cap_action_timestamps();

    if let Some(target) = draft.target_uri.as_deref() {
        state.responded_uris.insert(target.to_string());
    }

    if let Some(actor) = draft.metadata.actor.as_deref() {
        *state.per_user_counts.entry(actor.to_string()).or_insert(0) += 1;
        state
            .per_user_last_interaction
            .insert(actor.to_string(), now);
    }

    if let Some(root) = draft.root_uri().map(str::to_string) {
        state
            .per_thread_replies
            .entry(root.clone())
            .or_default()
            .push(now);
        state.prune_thread_replies(now);
        if state.replies_in_window(&root, now, Duration::minutes(30)) >= 3 {
            state
                .thread_cooldowns
                .insert(root, now + Duration::hours(1));
        }
    }

    state.recent_commit_times.push(now);
    let cutoff = now - Duration::hours(6);
    state.recent_commit_times.retain(|at| *at >= cutoff);
    let last_hour = state
        .recent_commit_times
        .iter()
        .filter(|at| now.signed_duration_since(**at).num_seconds() <= 3600)
        .count();
    if last_hour >= 5 {
        state
            .cooldowns
            .insert("global".to_string(), now + Duration::hours(3));
    }

    store.save(state)
}

async fn fire_memory_hooks(
    deps: &RunDeps<'_>,
    trace: &mut RunTrace,
    draft: &Draft,
    salience: f64,
) {
    let memory = deps.toolset.memory_policy();
    let summary = format!(
        "Committed {} on {} intent={}",
        draft.kind,
        draft.target_uri.as_deref().unwrap_or("(no target)"),
        draft.intent,
    );
    if salience >= memory.summary_threshold {
        deps.toolset.write_event_summary(&summary).await;
        trace.called("memory_write");
    }
    if salience >= memory.core_threshold {
        deps.toolset
            .update_core_memory(&format!("Durable update: {summary}"))
            .await;
        trace.called("memory_update_core");
    }
}

/// One pipeline invocation; at most one commit.
pub async fn run_once(deps: &RunDeps<'_>) -> Result<()> {
    let mut trace = RunTrace::new();
    let mut state = deps.state_store.load();

    let observation = deps.toolset.observe(&mut state).await;
    trace.called("observe");
    for (actor, consented) in &observation.consent_updates {
        if *consented {
            state.record_consent(actor);
        }
    }
    // Persist immediately so the poll-unchanged counter survives runs that
    // never reach a commit.
    if let Err(err) = deps.state_store.save(&state) {
        warn!(%err, "state save after observe failed");
    }

    let actions = deps
        .toolset
        .propose_actions(&observation, &mut state)
        .await;
    trace.called("propose_actions");

    if actions.is_empty() {
        deps.telemetry.append(&trace.abort_event("no_actions"))?;
        return Ok(());
    }
    let actions = apply_consent_filter(actions, &observation, &state);

    let policy = deps.toolset.policy();
    let mut chosen = pick_action(&actions, policy);
    trace.called("pick_action");

    if should_queue_for_commitments(&chosen.action, &state) {
        chosen.action = chosen.action.into_queue("queued_for_open_commitments");
    }

    if chosen.j_score < policy.low_action_threshold {
        let mut event = trace.abort_event("j_below_threshold");
        decision_components(&mut event, chosen.action.kind, chosen.j_score, chosen.action.salience);
        deps.telemetry.append(&event)?;
        return Ok(());
    }

    if chosen.action.kind == ActionKind::Queue {
        let mut draft = create_draft(&chosen.action);
        deps.outbox.create(&mut draft)?;
        trace.called("outbox_create_draft");
        let reason = if chosen.action.notes == "queued_for_open_commitments" {
            "queued_for_open_commitments"
        } else {
            "model_queue"
        };
        deps.outbox.mark_queued(&draft.id, reason)?;
        trace.called("outbox_mark_queued");
        record_commitment_if_present(&draft, &mut state);
        if let Some(notification_id) = chosen.action.metadata.notification_id.as_deref() {
            if state.mark_notification_processed(notification_id) {
                deps.state_store.save(&state)?;
            }
        }
        let mut event = trace.abort_event("queued_by_model");
        decision_components(&mut event, ActionKind::Queue, chosen.j_score, chosen.action.salience);
        deps.telemetry.append(&event)?;
        return Ok(());
    }

    if chosen.action.kind == ActionKind::Ignore {
        if let Some(notification_id) = chosen.action.metadata.notification_id.as_deref() {
            if state.mark_notification_processed(notification_id) {
                deps.state_store.save(&state)?;
            }
        }
        let mut event = trace.abort_event("no_commit_action");
        decision_components(&mut event, ActionKind::Ignore, chosen.j_score, chosen.action.salience);
        deps.telemetry.append(&event)?;
        return Ok(());
    }

    if chosen.action.salience < policy.salience.low_threshold
        && chosen.action.kind != ActionKind::Like
    {
        let mut event = trace.abort_event("salience_too_low");
        decision_components(&mut event, chosen.action.kind, chosen.j_score, chosen.action.salience);
        deps.telemetry.append(&event)?;
        return Ok(());
    }

    let mut draft = create_draft(&chosen.action);
    deps.outbox.create(&mut draft)?;
    trace.called("outbox_create_draft");

    if chosen.action.salience < policy.salience.high_threshold {
        deps.outbox.mark_queued(&draft.id, "medium_salience")?;
        trace.called("outbox_mark_queued");
        let mut event = trace.abort_event("queued_medium_salience");
        decision_components(&mut event, chosen.action.kind, chosen.j_score, chosen.action.salience);
        deps.telemetry.append(&event)?;
        return Ok(());
    }

    let preflight = validate_draft(&draft, &state, deps.preflight);
    trace.called("preflight");

    if !preflight.passed {
        deps.outbox
            .mark_aborted(&draft.id, &preflight.reasons.join(";"))?;
        trace.called("outbox_mark_aborted");
        let mut event = trace.abort_event("preflight_failed");
        decision_components(&mut event, chosen.action.kind, chosen.j_score, chosen.action.salience);
        event.preflight = Some(preflight);
        deps.telemetry.append(&event)?;
        return Ok(());
    }

    let commit_result = deps.toolset.commit(&draft).await;
    trace.called("commit");

    if commit_result.success {
        deps.outbox
            .mark_committed(&draft.id, commit_result.external_uri.as_deref())?;
        trace.called("outbox_mark_committed");
        apply_commit_state(&draft, &mut state, deps.state_store)?;
        fire_memory_hooks(deps, &mut trace, &draft, chosen.action.salience).await;
        info!(
            draft_id = %draft.id,
            kind = %draft.kind,
            uri = commit_result.external_uri.as_deref().unwrap_or(""),
            "commit succeeded"
        );
    } else {
        deps.outbox.mark_aborted(
            &draft.id,
            commit_result.error.as_deref().unwrap_or("commit_failed"),
        )?;
        trace.called("outbox_mark_aborted");
    }

    let mut event = trace.event();
    decision_components(&mut event, chosen.action.kind, chosen.j_score, chosen.action.salience);
    event.preflight = Some(preflight);
    if commit_result.success {
        event.output_graphemes = draft.text.as_deref().map(grapheme_len);
    } else {
        event.abort_reason = Some("commit_failed".to_string());
    }
    event.commit_result = Some(commit_result);
    deps.telemetry.append(&event)?;

    Ok(())
}

/// Scan queued drafts and try to commit them; the first success ends the run.
/// Preflight or commit failures abort that draft and scanning continues.
pub async fn run_queue_once(deps: &RunDeps<'_>, max_items: usize) -> Result<()> {
    let mut trace = RunTrace::new();
    trace.called("queue_scan");
    trace.loop_iter = 0;

    let mut state = deps.state_store.load();
    let mut queued = deps.outbox.list_by_status(DraftStatus::Queued)?;
    queued.truncate(max_items);

    if queued.is_empty() {
        deps.telemetry.append(&trace.abort_event("queue_empty"))?;
        return Ok(());
    }

    for draft in queued {
        trace.loop_iter += 1;
        trace.called("queue_pick");

        let preflight = validate_draft(&draft, &state, deps.preflight);
        trace.called("preflight");
        if !preflight.passed {
            deps.outbox
                .mark_aborted(&draft.id, &preflight.reasons.join(";"))?;
            trace.called("outbox_mark_aborted");
            let mut event = trace.abort_event("queue_preflight_failed");
            queue_components(&mut event, &draft);
            event.preflight = Some(preflight);
            deps.telemetry.append(&event)?;
            continue;
        }

        let commit_result = deps.toolset.commit(&draft).await;
        trace.called("commit");

        if commit_result.success {
            deps.outbox
                .mark_committed(&draft.id, commit_result.external_uri.as_deref())?;
            trace.called("outbox_mark_committed");
            apply_commit_state(&draft, &mut state, deps.state_store)?;
            fire_memory_hooks(deps, &mut trace, &draft, draft.salience).await;

            let mut event = trace.event();
            queue_components(&mut event, &draft);
            event.preflight = Some(preflight);
            event.output_graphemes = draft.text.as_deref().map(grapheme_len);
            event.commit_result = Some(commit_result);
            deps.telemetry.append(&event)?;
            return Ok(());
        }

        deps.outbox.mark_aborted(
            &draft.id,
            commit_result.error.as_deref().unwrap_or("commit_failed"),
        )?;
        trace.called("outbox_mark_aborted");
        let mut event = trace.abort_event("commit_failed");
        queue_components(&mut event, &draft);
        event.preflight = Some(preflight);
        event.commit_result = Some(commit_result);
        deps.telemetry.append(&event)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionMetadata, CommitResult, Notification, Observation};
    use crate::toolset::{DecisionPolicy, MemoryPolicy};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct TestToolset {
        policy: DecisionPolicy,
        memory: MemoryPolicy,
        observation: Observation,
        proposals: Mutex<Vec<Vec<CandidateAction>>>,
        commits: AtomicUsize,
        fail_commit: bool,
    }

    impl TestToolset {
        fn new(proposals: Vec<Vec<CandidateAction>>) -> Self {
            Self {
                policy: DecisionPolicy {
                    epsilon: 0.0,
                    temperature: 0.0,
                    ..DecisionPolicy::default()
                },
                memory: MemoryPolicy::default(),
                observation: Observation::default(),
                proposals: Mutex::new(proposals),
                commits: AtomicUsize::new(0),
                fail_commit: false,
            }
        }

        fn commit_count(&self) -> usize {
            self.commits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Toolset for TestToolset {
        fn policy(&self) -> &DecisionPolicy {
            &self.policy
        }

        fn memory_policy(&self) -> &MemoryPolicy {
            &self.memory
        }

        async fn observe(&self, _state: &mut AgentState) -> Observation {
            self.observation.clone()
        }

        async fn propose_actions(
            &self,
            _observation: &Observation,
            _state: &mut AgentState,
        ) -> Vec<CandidateAction> {
            let mut proposals = self.proposals.lock().unwrap();
            if proposals.is_empty() {
                Vec::new()
            } else {
                proposals.remove(0)
            }
        }

        async fn commit(&self, _draft: &Draft) -> CommitResult {
            if self.fail_commit {
                return CommitResult::failed("network down");
            }
            self.commits.fetch_add(1, Ordering::SeqCst);
            CommitResult::ok(Some("at://committed/1".to_string()))
        }
    }

    struct Harness {
        _dir: TempDir,
        state_store: AgentStateStore,
        telemetry: TelemetryStore,
        outbox: OutboxStore,
        preflight: PreflightPolicy,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let state_store = AgentStateStore::new(dir.path().join("agent_state.json"));
            let telemetry = TelemetryStore::new(dir.path().join("telemetry.jsonl"));
            let outbox = OutboxStore::new(dir.path().join("outbox")).unwrap();
            let preflight = PreflightPolicy {
                require_fresh_sync: false,
                cooldown_seconds: 0,
                ..PreflightPolicy::default()
            };
            Self {
                _dir: dir,
                state_store,
                telemetry,
                outbox,
                preflight,
            }
        }

        fn deps<'a>(&'a self, toolset: &'a TestToolset) -> RunDeps<'a> {
            RunDeps {
                toolset,
                state_store: &self.state_store,
                telemetry: &self.telemetry,
                outbox: &self.outbox,
                preflight: &self.preflight,
            }
        }
    }

    fn reply_candidate(target: &str, text: &str, actor: &str) -> CandidateAction {
        let mut action = CandidateAction::ignore(Some(target.to_string()), "test");
        action.kind = ActionKind::Reply;
        action.text = Some(text.to_string());
        action.intent = "reply".to_string();
        action.confidence = 0.8;
        action.salience = 0.75;
        action.delta_u = 0.5;
        action.metadata = ActionMetadata {
            notification_id: Some(target.to_string()),
            actor: Some(actor.to_string()),
            ..ActionMetadata::default()
        };
        action
    }

    fn post_candidate(text: &str, root: &str) -> CandidateAction {
        let mut action = CandidateAction::ignore(Some(format!("{root}/self")), "test");
        action.kind = ActionKind::Post;
        action.text = Some(text.to_string());
        action.intent = "post".to_string();
        action.confidence = 0.9;
        action.salience = 0.8;
        action.delta_u = 0.6;
        action.metadata.root_uri = Some(root.to_string());
        action
    }

    #[tokio::test]
    async fn fresh_reply_commits_and_updates_state() {
        let harness = Harness::new();
        let toolset = TestToolset::new(vec![vec![reply_candidate(
            "at://x/post/1",
            "Hi Alice — got it.",
            "@alice",
        )]]);

        run_once(&harness.deps(&toolset)).await.unwrap();

        assert_eq!(toolset.commit_count(), 1);
        let state = harness.state_store.load();
        assert!(state.is_notification_processed("at://x/post/1"));
        assert_eq!(state.per_user_counts["@alice"], 1);
        assert!(state.last_commit_at.is_some());
        assert!(state.responded_uris.contains("at://x/post/1"));

        let events = harness.telemetry.read_all().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.chosen_action.as_deref(), Some("reply"));
        assert!(last.commit_result.as_ref().unwrap().success);

        let committed = harness.outbox.list_by_status(DraftStatus::Committed).unwrap();
        assert_eq!(committed.len(), 1);
    }

    #[tokio::test]
    async fn at_most_one_commit_per_run() {
        let harness = Harness::new();
        let toolset = TestToolset::new(vec![vec![
            reply_candidate("at://x/post/1", "first", "@a"),
            reply_candidate("at://x/post/2", "second", "@b"),
            reply_candidate("at://x/post/3", "third", "@c"),
        ]]);

        run_once(&harness.deps(&toolset)).await.unwrap();

        assert_eq!(toolset.commit_count(), 1);
        let events = harness.telemetry.read_all().unwrap();
        let successes = events
            .iter()
            .filter(|e| e.commit_result.as_ref().is_some_and(|c| c.success))
            .count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn commit_cooldown_aborts_second_run() {
        let harness = Harness::new();
        let preflight = PreflightPolicy {
            require_fresh_sync: false,
            ..PreflightPolicy::default()
        };
        let toolset = TestToolset::new(vec![vec![reply_candidate(
            "at://x/post/2",
            "again?",
            "@alice",
        )]]);
        let mut state = AgentState::default();
        state.last_commit_at = Some(Utc::now() - Duration::seconds(10));
        harness.state_store.save(&state).unwrap();

        let deps = RunDeps {
            toolset: &toolset,
            state_store: &harness.state_store,
            telemetry: &harness.telemetry,
            outbox: &harness.outbox,
            preflight: &preflight,
        };
        run_once(&deps).await.unwrap();

        assert_eq!(toolset.commit_count(), 0);
        let aborted = harness.outbox.list_by_status(DraftStatus::Aborted).unwrap();
        assert_eq!(aborted.len(), 1);
        assert!(
            aborted[0]
                .abort_reason
                .as_deref()
                .unwrap()
                .contains("cooldown_active")
        );
        let events = harness.telemetry.read_all().unwrap();
        assert_eq!(
            events.last().unwrap().abort_reason.as_deref(),
            Some("preflight_failed")
        );
    }

    #[tokio::test]
    async fn consent_filter_limits_unconsented_humans_to_one_reply() {
        let harness = Harness::new();
        let mut ignore =
            CandidateAction::ignore(Some("at://x/post/5".to_string()), "always-available ignore");
        ignore.metadata.notification_id = Some("at://x/post/5".to_string());
        let mut toolset = TestToolset::new(vec![vec![
            reply_candidate("at://x/post/5", "a second reply", "@alice"),
            ignore,
        ]]);
        toolset.observation = Observation {
            notifications: vec![Notification {
                uri: "at://x/post/5".to_string(),
                reason: "reply".to_string(),
                author: crate::models::ActorRef {
                    handle: Some("@alice".to_string()),
                    did: None,
                },
                ..Notification::default()
            }],
            ..Observation::default()
        };

        // One reply already went out and @alice never opted in.
        let mut state = AgentState::default();
        state.per_user_counts.insert("@alice".to_string(), 1);
        harness.state_store.save(&state).unwrap();

        run_once(&harness.deps(&toolset)).await.unwrap();

        assert_eq!(toolset.commit_count(), 0);
        let state = harness.state_store.load();
        assert!(state.is_notification_processed("at://x/post/5"));
        let events = harness.telemetry.read_all().unwrap();
        assert_eq!(
            events.last().unwrap().chosen_action.as_deref(),
            Some("ignore")
        );
    }

    #[tokio::test]
    async fn consent_phrases_in_observations_unlock_follow_ups() {
        let harness = Harness::new();
        let mut toolset = TestToolset::new(vec![vec![reply_candidate(
            "at://x/post/6",
            "happy to keep chatting",
            "@bob",
        )]]);
        toolset.observation = Observation {
            notifications: vec![Notification {
                uri: "at://x/post/6".to_string(),
                reason: "reply".to_string(),
                author: crate::models::ActorRef {
                    handle: Some("@bob".to_string()),
                    did: None,
                },
                ..Notification::default()
            }],
            consent_updates: std::collections::BTreeMap::from([("@bob".to_string(), true)]),
            ..Observation::default()
        };

        let mut state = AgentState::default();
        state.per_user_counts.insert("@bob".to_string(), 1);
        harness.state_store.save(&state).unwrap();

        run_once(&harness.deps(&toolset)).await.unwrap();

        // Consent recorded during observe lets the reply through.
        assert_eq!(toolset.commit_count(), 1);
        let state = harness.state_store.load();
        assert!(state.is_consented("@bob"));
    }

    #[tokio::test]
    async fn ignore_marks_notification_processed_without_commit() {
        let harness = Harness::new();
        let mut ignore = CandidateAction::ignore(Some("at://x/post/1".to_string()), "nothing here");
        ignore.metadata.notification_id = Some("at://x/post/1".to_string());
        let toolset = TestToolset::new(vec![vec![ignore]]);

        run_once(&harness.deps(&toolset)).await.unwrap();

        assert_eq!(toolset.commit_count(), 0);
        let state = harness.state_store.load();
        assert!(state.is_notification_processed("at://x/post/1"));
        let events = harness.telemetry.read_all().unwrap();
        assert_eq!(
            events.last().unwrap().abort_reason.as_deref(),
            Some("no_commit_action")
        );
    }

    #[tokio::test]
    async fn medium_salience_holds_draft_in_queue() {
        let harness = Harness::new();
        let mut action = reply_candidate("at://x/post/1", "tentative reply", "@alice");
        action.salience = 0.5;
        let toolset = TestToolset::new(vec![vec![action]]);

        run_once(&harness.deps(&toolset)).await.unwrap();

        assert_eq!(toolset.commit_count(), 0);
        let queued = harness.outbox.list_by_status(DraftStatus::Queued).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].queue_reason.as_deref(), Some("medium_salience"));
    }

    #[tokio::test]
    async fn low_salience_skips_without_draft() {
        let harness = Harness::new();
        let mut action = reply_candidate("at://x/post/1", "meh", "@alice");
        action.salience = 0.1;
        let toolset = TestToolset::new(vec![vec![action]]);

        run_once(&harness.deps(&toolset)).await.unwrap();

        assert_eq!(toolset.commit_count(), 0);
        assert!(harness.outbox.list_ids().unwrap().is_empty());
        let events = harness.telemetry.read_all().unwrap();
        assert_eq!(
            events.last().unwrap().abort_reason.as_deref(),
            Some("salience_too_low")
        );
    }

    #[tokio::test]
    async fn negative_j_is_rejected() {
        let harness = Harness::new();
        let mut action = reply_candidate("at://x/post/1", "costly", "@alice");
        action.delta_u = -0.5;
        let toolset = TestToolset::new(vec![vec![action]]);

        run_once(&harness.deps(&toolset)).await.unwrap();

        assert_eq!(toolset.commit_count(), 0);
        let events = harness.telemetry.read_all().unwrap();
        assert_eq!(
            events.last().unwrap().abort_reason.as_deref(),
            Some("j_below_threshold")
        );
    }

    #[tokio::test]
    async fn commitments_gate_unrelated_actions_and_discharge_on_link() {
        let harness = Harness::new();
        let toolset = TestToolset::new(vec![
            vec![post_candidate("I will link the write-up", "at://r/1")],
            vec![reply_candidate("at://other/post/9", "unrelated reply", "@bob")],
            vec![{
                let mut action = reply_candidate(
                    "at://r/1/reply",
                    "as promised: https://x.example/writeup",
                    "@alice",
                );
                action.metadata.root_uri = Some("at://r/1".to_string());
                action
            }],
        ]);
        let deps = harness.deps(&toolset);

        // Run 1: the post commits and its promise is harvested.
        run_once(&deps).await.unwrap();
        let state = harness.state_store.load();
        assert_eq!(state.open_commitments.len(), 1);
        assert_eq!(state.open_commitments[0].root_uri, "at://r/1");

        // Run 2: an unrelated reply gets rewritten into a queued draft.
        run_once(&deps).await.unwrap();
        assert_eq!(toolset.commit_count(), 1);
        let queued = harness.outbox.list_by_status(DraftStatus::Queued).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(
            queued[0].queue_reason.as_deref(),
            Some("queued_for_open_commitments")
        );

        // Run 3: a reply on the committed thread containing a URL discharges it.
        run_once(&deps).await.unwrap();
        assert_eq!(toolset.commit_count(), 2);
        let state = harness.state_store.load();
        assert!(state.open_commitments.is_empty());
    }

    #[tokio::test]
    async fn burst_of_five_commits_sets_global_cooldown() {
        let harness = Harness::new();
        let proposals: Vec<Vec<CandidateAction>> = (0..6)
            .map(|i| {
                vec![reply_candidate(
                    &format!("at://x/post/{i}"),
                    &format!("reply number {i}"),
                    "@alice",
                )]
            })
            .collect();
        let toolset = TestToolset::new(proposals);
        let deps = harness.deps(&toolset);

        for _ in 0..5 {
            run_once(&deps).await.unwrap();
        }
        assert_eq!(toolset.commit_count(), 5);
        let state = harness.state_store.load();
        assert!(state.cooldowns.contains_key("global"));

        // The sixth run fails preflight on the burst cooldown.
        run_once(&deps).await.unwrap();
        assert_eq!(toolset.commit_count(), 5);
        let aborted = harness.outbox.list_by_status(DraftStatus::Aborted).unwrap();
        assert!(
            aborted
                .iter()
                .any(|d| d.abort_reason.as_deref().unwrap_or("").contains("burst_cooldown_active"))
        );
    }

    #[tokio::test]
    async fn three_replies_in_thread_set_thread_cooldown() {
        let harness = Harness::new();
        let proposals: Vec<Vec<CandidateAction>> = (0..4)
            .map(|i| {
                let mut action = reply_candidate(
                    &format!("at://r/1/reply/{i}"),
                    &format!("thread reply {i}"),
                    "@alice",
                );
                action.metadata.root_uri = Some("at://r/1".to_string());
                action
            })
            .map(|a| vec![a])
            .collect();
        let toolset = TestToolset::new(proposals);
        let deps = harness.deps(&toolset);

        for _ in 0..3 {
            run_once(&deps).await.unwrap();
        }
        assert_eq!(toolset.commit_count(), 3);
        let state = harness.state_store.load();
        assert!(state.thread_cooldowns.contains_key("at://r/1"));

        run_once(&deps).await.unwrap();
        assert_eq!(toolset.commit_count(), 3);
        let aborted = harness.outbox.list_by_status(DraftStatus::Aborted).unwrap();
        assert!(
            aborted
                .iter()
                .any(|d| d.abort_reason.as_deref().unwrap_or("").contains("thread_pacing_cooldown"))
        );
    }

    #[tokio::test]
    async fn queue_run_commits_first_passing_draft_only() {
        let harness = Harness::new();
        let toolset = TestToolset::new(Vec::new());

        let mut first = create_draft(&reply_candidate("at://x/post/1", "queued one", "@a"));
        let mut second = create_draft(&reply_candidate("at://x/post/2", "queued two", "@b"));
        harness.outbox.create(&mut first).unwrap();
        harness.outbox.create(&mut second).unwrap();
        harness.outbox.mark_queued(&first.id, "medium_salience").unwrap();
        harness.outbox.mark_queued(&second.id, "medium_salience").unwrap();

        run_queue_once(&harness.deps(&toolset), 3).await.unwrap();

        assert_eq!(toolset.commit_count(), 1);
        let committed = harness.outbox.list_by_status(DraftStatus::Committed).unwrap();
        let queued = harness.outbox.list_by_status(DraftStatus::Queued).unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(queued.len(), 1);
    }

    #[tokio::test]
    async fn queue_run_skips_failing_drafts_and_continues() {
        let harness = Harness::new();
        let toolset = TestToolset::new(Vec::new());

        let mut low_confidence = reply_candidate("at://x/post/1", "shaky", "@a");
        low_confidence.confidence = 0.1;
        let mut first = create_draft(&low_confidence);
        let mut second = create_draft(&reply_candidate("at://x/post/2", "solid", "@b"));
        harness.outbox.create(&mut first).unwrap();
        harness.outbox.create(&mut second).unwrap();
        harness.outbox.mark_queued(&first.id, "model_queue").unwrap();
        harness.outbox.mark_queued(&second.id, "model_queue").unwrap();

        run_queue_once(&harness.deps(&toolset), 3).await.unwrap();

        assert_eq!(toolset.commit_count(), 1);
        let first_after = harness.outbox.get(&first.id).unwrap().unwrap();
        assert_eq!(first_after.status, DraftStatus::Aborted);
        let second_after = harness.outbox.get(&second.id).unwrap().unwrap();
        assert_eq!(second_after.status, DraftStatus::Committed);
    }

    #[tokio::test]
    async fn empty_queue_emits_trace_only() {
        let harness = Harness::new();
        let toolset = TestToolset::new(Vec::new());

        run_queue_once(&harness.deps(&toolset), 3).await.unwrap();

        let events = harness.telemetry.read_all().unwrap();
        assert_eq!(events.last().unwrap().abort_reason.as_deref(), Some("queue_empty"));
    }

    #[tokio::test]
    async fn failed_commit_marks_draft_aborted() {
        let harness = Harness::new();
        let mut toolset = TestToolset::new(vec![vec![reply_candidate(
            "at://x/post/1",
            "doomed",
            "@alice",
        )]]);
        toolset.fail_commit = true;

        run_once(&harness.deps(&toolset)).await.unwrap();

        let aborted = harness.outbox.list_by_status(DraftStatus::Aborted).unwrap();
        assert_eq!(aborted.len(), 1);
        let events = harness.telemetry.read_all().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.abort_reason.as_deref(), Some("commit_failed"));
        assert!(!last.commit_result.as_ref().unwrap().success);

        // A failed commit leaves the commit clock untouched.
        let state = harness.state_store.load();
        assert!(state.last_commit_at.is_none());
    }
}
