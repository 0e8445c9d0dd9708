//! Dynamic dispatch across providers reduced to a single small capability:
//! `chat(messages) → reply` and `chat_stream(messages) → sequence of chunks`.
//! The engine itself is provider-agnostic.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider error ({status}): {body}")]
    Provider { status: u16, body: String },
    #[error("stream error: {0}")]
    Stream(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;

/// A provider's streaming capability yields chunks on `tx` and returns the
/// full accumulated text once the stream completes.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;
    async fn chat_stream(&self, messages: &[ChatMessage], tx: mpsc::Sender<String>) -> Result<String>;
}

fn to_wire(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect()
}

/// Ollama `/api/chat` backed provider.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(model: impl Into<String>) -> Self {
        let base_url = std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| "http://localhost:11434".to_string());
        Self {
            client: reqwest::Client::new(),
            base_url,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let endpoint = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let payload = json!({ "model": self.model, "messages": to_wire(messages), "stream": false });

        let response = self.client.post(&endpoint).json(&payload).send().await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), %body, "ollama chat request failed");
            return Err(LlmError::Provider { status: status.as_u16(), body: body.to_string() });
        }

        Ok(body
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn chat_stream(&self, messages: &[ChatMessage], tx: mpsc::Sender<String>) -> Result<String> {
        let endpoint = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let payload = json!({ "model": self.model, "messages": to_wire(messages), "stream": true });

        let mut response = self.client.post(&endpoint).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), %body, "ollama chat_stream request failed");
            return Err(LlmError::Provider { status: status.as_u16(), body: body.to_string() });
        }

        let mut full = String::new();
        while let Some(chunk) = response.chunk().await? {
            let chunk_str = String::from_utf8_lossy(&chunk);
            for line in chunk_str.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(json) = serde_json::from_str::<serde_json::Value>(line) else { continue };
                if let Some(content) = json.get("message").and_then(|m| m.get("content")).and_then(|v| v.as_str()) {
                    if !content.is_empty() {
                        full.push_str(content);
                        let _ = tx.send(content.to_string()).await;
                    }
                }
            }
        }
        Ok(full)
    }
}

/// Scripted response for [`MockProvider`], used so engine tests never touch
/// the network.
#[derive(Debug, Clone)]
pub enum MockStep {
    Text(String),
    Error(String),
}

#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    script: Arc<Mutex<VecDeque<MockStep>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<MockStep>) -> Self {
        Self { script: Arc::new(Mutex::new(VecDeque::from(steps))) }
    }

    pub async fn push_step(&self, step: MockStep) {
        self.script.lock().await.push_back(step);
    }

    async fn next_step(&self) -> Option<MockStep> {
        self.script.lock().await.pop_front()
    }
}

fn fallback_echo(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User)
        .map(|m| format!("mock-echo: {}", m.content))
        .unwrap_or_else(|| "mock-ok".to_string())
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        match self.next_step().await {
            Some(MockStep::Text(text)) => Ok(text),
            Some(MockStep::Error(message)) => Err(LlmError::Stream(message)),
            None => Ok(fallback_echo(messages)),
        }
    }

    async fn chat_stream(&self, messages: &[ChatMessage], tx: mpsc::Sender<String>) -> Result<String> {
        let reply = self.chat(messages).await?;
        let _ = tx.send(reply.clone()).await;
        Ok(reply)
    }
}
