//! Commit dispatch: the only path from a draft to a side effect.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{ActionKind, CommitResult, Draft};

/// One entry in the action-kind-indexed executor table.  Implementations
/// wrap the platform APIs and report the outcome instead of raising.
#[async_trait]
pub trait CommitHandler: Send + Sync {
    async fn commit(&self, draft: &Draft) -> CommitResult;
}

/// Routes drafts to their handler by action kind.  Kinds without a handler
/// fail the commit rather than panicking; `Ignore` and `Queue` never reach
/// this table.
#[derive(Default)]
pub struct CommitDispatcher {
    handlers: HashMap<ActionKind, Arc<dyn CommitHandler>>,
}

impl CommitDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ActionKind, handler: Arc<dyn CommitHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn with_handler(mut self, kind: ActionKind, handler: Arc<dyn CommitHandler>) -> Self {
        self.register(kind, handler);
        self
    }

    pub async fn commit(&self, draft: &Draft) -> CommitResult {
        match self.handlers.get(&draft.kind) {
            Some(handler) => handler.commit(draft).await,
            None => CommitResult::failed(format!("No commit handler for {}", draft.kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionMetadata, DraftStatus};
    use chrono::Utc;

    struct StaticHandler {
        uri: &'static str,
    }

    #[async_trait]
    impl CommitHandler for StaticHandler {
        async fn commit(&self, _draft: &Draft) -> CommitResult {
            CommitResult::ok(Some(self.uri.to_string()))
        }
    }

    fn draft(kind: ActionKind) -> Draft {
        Draft {
            id: "abc".to_string(),
            kind,
            target_uri: None,
            text: Some("hi".to_string()),
            intent: String::new(),
            constraints: Vec::new(),
            confidence: 0.9,
            salience: 0.9,
            risk_flags: Vec::new(),
            abort_if: Vec::new(),
            metadata: ActionMetadata::default(),
            queue_reason: None,
            abort_reason: None,
            commit_uri: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            status: DraftStatus::Draft,
        }
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let dispatcher = CommitDispatcher::new()
            .with_handler(ActionKind::Post, Arc::new(StaticHandler { uri: "at://p/1" }));
        let result = dispatcher.commit(&draft(ActionKind::Post)).await;
        assert!(result.success);
        assert_eq!(result.external_uri.as_deref(), Some("at://p/1"));
    }

    #[tokio::test]
    async fn missing_handler_reports_error() {
        let dispatcher = CommitDispatcher::new();
        let result = dispatcher.commit(&draft(ActionKind::Like)).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("No commit handler for like"));
    }
}
