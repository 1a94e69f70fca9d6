//! Baseline toolset: decision policies plus a commit dispatcher, with the
//! contract's degraded defaults for observe and propose.
//!
//! Surface glue replaces the observe/propose halves with real platform
//! reads and an LLM-backed proposer; the baseline keeps every pipeline
//! entry point runnable without them.  When a passage store is attached,
//! committed drafts are mirrored into the remote append-only log and the
//! memory hooks write real event summaries and core patches.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use magenta_flow::{
    CommitDispatcher, CommitResult, DecisionPolicy, Draft, DraftStatus, MemoryPolicy, Toolset,
};
use magenta_mirror::{PassageStore, mirror_draft, update_core_memory, write_event_summary};

pub struct BaselineToolset {
    policy: DecisionPolicy,
    memory: MemoryPolicy,
    dispatcher: CommitDispatcher,
    passages: Option<Arc<dyn PassageStore>>,
}

impl BaselineToolset {
    pub fn new(policy: DecisionPolicy, memory: MemoryPolicy, dispatcher: CommitDispatcher) -> Self {
        Self {
            policy,
            memory,
            dispatcher,
            passages: None,
        }
    }

    /// Attach the remote passage store; enables the draft-log mirror and the
    /// memory hooks.
    pub fn with_passages(mut self, passages: Arc<dyn PassageStore>) -> Self {
        self.passages = Some(passages);
        self
    }

    pub fn dispatcher_mut(&mut self) -> &mut CommitDispatcher {
        &mut self.dispatcher
    }
}

impl Default for BaselineToolset {
    fn default() -> Self {
        Self::new(
            DecisionPolicy::default(),
            MemoryPolicy::default(),
            CommitDispatcher::new(),
        )
    }
}

#[async_trait]
impl Toolset for BaselineToolset {
    fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    fn memory_policy(&self) -> &MemoryPolicy {
        &self.memory
    }

    async fn commit(&self, draft: &Draft) -> CommitResult {
        let result = self.dispatcher.commit(draft).await;
        if result.success {
            if let Some(passages) = &self.passages {
                let mut mirrored = draft.clone();
                mirrored.status = DraftStatus::Committed;
                mirrored.commit_uri = result.external_uri.clone();
                if let Err(err) = mirror_draft(passages.as_ref(), &mirrored).await {
                    warn!(%err, draft_id = %draft.id, "draft mirror failed");
                }
            }
        }
        result
    }

    async fn write_event_summary(&self, summary: &str) {
        if let Some(passages) = &self.passages {
            if let Err(err) = write_event_summary(passages.as_ref(), summary, &[]).await {
                warn!(%err, "event summary write failed");
            }
        }
    }

    async fn update_core_memory(&self, patch: &str) {
        if let Some(passages) = &self.passages {
            if let Err(err) = update_core_memory(passages.as_ref(), patch).await {
                warn!(%err, "core memory update failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magenta_flow::{ActionKind, AgentState, CandidateAction, CommitHandler};
    use magenta_mirror::InMemoryPassageStore;

    struct OkHandler;

    #[async_trait]
    impl CommitHandler for OkHandler {
        async fn commit(&self, _draft: &Draft) -> CommitResult {
            CommitResult::ok(Some("at://committed/1".to_string()))
        }
    }

    #[tokio::test]
    async fn default_proposal_is_a_lone_ignore() {
        let toolset = BaselineToolset::default();
        let mut state = AgentState::default();
        let observation = toolset.observe(&mut state).await;
        let actions = toolset.propose_actions(&observation, &mut state).await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Ignore);
    }

    #[tokio::test]
    async fn commit_without_handlers_reports_missing_handler() {
        let toolset = BaselineToolset::default();
        let action = CandidateAction::ignore(None, "test");
        let mut draft = magenta_flow::create_draft(&action);
        draft.kind = ActionKind::Post;
        let result = toolset.commit(&draft).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("No commit handler"));
    }

    #[tokio::test]
    async fn successful_commits_are_mirrored_when_passages_attached() {
        let passages = Arc::new(InMemoryPassageStore::new());
        let mut dispatcher = CommitDispatcher::new();
        dispatcher.register(ActionKind::Post, Arc::new(OkHandler));
        let toolset = BaselineToolset::new(
            DecisionPolicy::default(),
            MemoryPolicy::default(),
            dispatcher,
        )
        .with_passages(passages.clone());

        let mut action = CandidateAction::ignore(None, "test");
        action.kind = ActionKind::Post;
        action.text = Some("hello".to_string());
        let mut draft = magenta_flow::create_draft(&action);
        draft.kind = ActionKind::Post;

        let result = toolset.commit(&draft).await;
        assert!(result.success);

        let mirrored = passages.list("outbox", 10).await.unwrap();
        assert_eq!(mirrored.len(), 1);
        assert!(mirrored[0].tags.contains(&"status:committed".to_string()));

        toolset.write_event_summary("Committed post").await;
        let events = passages.list("event", 10).await.unwrap();
        assert_eq!(events.len(), 1);
    }
}
