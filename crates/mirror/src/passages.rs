//! Archival passage store: immutable tagged blobs on the remote service.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Passage {
    /// Recency for most-recent-wins reads.
    pub fn effective_timestamp(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

/// The remote store contract: list by search term, create, delete.
/// Passages are immutable; updates are delete-then-create.
#[async_trait]
pub trait PassageStore: Send + Sync {
    async fn list(&self, search: &str, limit: usize) -> Result<Vec<Passage>>;
    async fn create(&self, text: &str, tags: &[String]) -> Result<Passage>;
    async fn delete(&self, passage_id: &str) -> Result<()>;
}

/// In-process store for tests and offline runs.
#[derive(Default)]
pub struct InMemoryPassageStore {
    passages: Mutex<Vec<Passage>>,
    counter: AtomicU64,
}

impl InMemoryPassageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.passages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PassageStore for InMemoryPassageStore {
    async fn list(&self, search: &str, limit: usize) -> Result<Vec<Passage>> {
        let passages = self.passages.lock().await;
        Ok(passages
            .iter()
            .filter(|p| p.text.contains(search) || p.tags.iter().any(|tag| tag.contains(search)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create(&self, text: &str, tags: &[String]) -> Result<Passage> {
        let id = format!("passage-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        let passage = Passage {
            id,
            text: text.to_string(),
            tags: tags.to_vec(),
            created_at: Utc::now(),
            updated_at: None,
        };
        self.passages.lock().await.push(passage.clone());
        Ok(passage)
    }

    async fn delete(&self, passage_id: &str) -> Result<()> {
        self.passages.lock().await.retain(|p| p.id != passage_id);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct CreatePassageRequest<'a> {
    text: &'a str,
    tags: &'a [String],
}

#[derive(Debug, Deserialize)]
struct PassageListResponse {
    #[serde(default)]
    passages: Vec<Passage>,
}

/// REST client for the agent service's archival memory.
#[derive(Debug, Clone)]
pub struct HttpPassageStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    agent_id: String,
}

impl HttpPassageStore {
    pub fn new(
        base_url: &str,
        api_key: &str,
        agent_id: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building passage store client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            agent_id: agent_id.to_string(),
        })
    }

    fn archival_url(&self) -> String {
        format!(
            "{}/v1/agents/{}/archival-memory",
            self.base_url, self.agent_id
        )
    }
}

#[async_trait]
impl PassageStore for HttpPassageStore {
    async fn list(&self, search: &str, limit: usize) -> Result<Vec<Passage>> {
        let limit = limit.to_string();
        let response = self
            .client
            .get(self.archival_url())
            .bearer_auth(&self.api_key)
            .query(&[("search", search), ("limit", limit.as_str())])
            .send()
            .await
            .context("listing passages")?
            .error_for_status()
            .context("passage list rejected")?;
        let body: PassageListResponse = response.json().await.context("decoding passage list")?;
        Ok(body.passages)
    }

    async fn create(&self, text: &str, tags: &[String]) -> Result<Passage> {
        let response = self
            .client
            .post(self.archival_url())
            .bearer_auth(&self.api_key)
            .json(&CreatePassageRequest { text, tags })
            .send()
            .await
            .context("creating passage")?
            .error_for_status()
            .context("passage create rejected")?;
        response.json().await.context("decoding created passage")
    }

    async fn delete(&self, passage_id: &str) -> Result<()> {
        self.client
            .delete(format!("{}/{}", self.archival_url(), passage_id))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("deleting passage")?
            .error_for_status()
            .context("passage delete rejected")?;
        Ok(())
    }
}
