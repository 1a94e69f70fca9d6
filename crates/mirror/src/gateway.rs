//! Persona gateway: send a wake prompt, get the response text back.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait PersonaGateway: Send + Sync {
    async fn send_prompt(&self, prompt: &str) -> Result<String>;
}

/// Gateway that swallows prompts; used when no remote persona is wired up.
#[derive(Debug, Clone, Default)]
pub struct NullPersonaGateway;

#[async_trait]
impl PersonaGateway for NullPersonaGateway {
    async fn send_prompt(&self, _prompt: &str) -> Result<String> {
        Ok(String::new())
    }
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    messages: [MessagePayload<'a>; 1],
}

#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    messages: Vec<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// REST client for the agent service's message endpoint.
#[derive(Debug, Clone)]
pub struct HttpPersonaGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    agent_id: String,
}

impl HttpPersonaGateway {
    pub fn new(base_url: &str, api_key: &str, agent_id: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building persona gateway client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            agent_id: agent_id.to_string(),
        })
    }
}

#[async_trait]
impl PersonaGateway for HttpPersonaGateway {
    async fn send_prompt(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/agents/{}/messages", self.base_url, self.agent_id);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&MessageRequest {
                messages: [MessagePayload {
                    role: "user",
                    content: prompt,
                }],
            })
            .send()
            .await
            .context("sending wake prompt")?
            .error_for_status()
            .context("wake prompt rejected")?;

        let body: MessageResponse = response.json().await.context("decoding persona response")?;
        // The last assistant message is the persona's actual reply; tool
        // chatter and reasoning entries come before it.
        let reply = body
            .messages
            .into_iter()
            .rev()
            .find(|message| message.message_type.as_deref() == Some("assistant_message"))
            .and_then(|message| message.content)
            .unwrap_or_default();
        Ok(reply)
    }
}
