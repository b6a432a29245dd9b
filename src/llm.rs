// src/llm.rs

use crate::config::AmplifySection;
use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

pub type ModelError = Box<dyn std::error::Error + Send + Sync>;

/// Prompts beyond this length are cut before sending to stay within the
/// service's context limits.
const MAX_PROMPT_CHARS: usize = 24_000;

/// One call to the text-understanding service.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Narrow seam over the external text-understanding service. The resolver
/// and checkers depend only on this trait; tests substitute scripted
/// implementations.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, req: ModelRequest) -> Result<String, ModelError>;
}

/// HTTP client for the Amplify API.
pub struct AmplifyClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl AmplifyClient {
    pub fn new(cfg: &AmplifySection) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        info!(url = %cfg.api_url, model = %cfg.model, "Using Amplify API backend");
        Ok(Self {
            client,
            api_url: cfg.api_url.clone(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
struct AmplifyRequest {
    data: AmplifyData,
}

#[derive(Debug, Serialize)]
struct AmplifyData {
    temperature: f64,
    max_tokens: u32,
    #[serde(rename = "dataSources")]
    data_sources: Vec<serde_json::Value>,
    messages: Vec<Message>,
    options: AmplifyOptions,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct AmplifyOptions {
    #[serde(rename = "ragOnly")]
    rag_only: bool,
    #[serde(rename = "skipRag")]
    skip_rag: bool,
    model: ModelId,
    prompt: String,
}

#[derive(Debug, Serialize)]
struct ModelId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AmplifyResponse {
    #[serde(default)]
    data: String,
}

#[async_trait]
impl TextModel for AmplifyClient {
    async fn complete(&self, req: ModelRequest) -> Result<String, ModelError> {
        let prompt = truncate_prompt(&req.prompt).to_string();

        let payload = AmplifyRequest {
            data: AmplifyData {
                temperature: req.temperature,
                max_tokens: req.max_tokens,
                data_sources: Vec::new(),
                messages: vec![Message {
                    role: "user",
                    content: prompt.clone(),
                }],
                options: AmplifyOptions {
                    rag_only: false,
                    skip_rag: true,
                    model: ModelId {
                        id: self.model.clone(),
                    },
                    prompt,
                },
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Amplify API error {status}: {body}").into());
        }

        let parsed: AmplifyResponse = response.json().await?;
        if parsed.data.trim().is_empty() {
            return Err("Empty response from Amplify API".into());
        }
        Ok(parsed.data)
    }
}

fn truncate_prompt(prompt: &str) -> &str {
    if prompt.len() <= MAX_PROMPT_CHARS {
        return prompt;
    }
    let mut end = MAX_PROMPT_CHARS;
    while !prompt.is_char_boundary(end) {
        end -= 1;
    }
    warn!(
        full = prompt.len(),
        sent = end,
        "Prompt truncated to fit context limits"
    );
    &prompt[..end]
}

/// Recover a JSON value from a model answer. Three independent attempts,
/// first success wins: the raw text as JSON, a fenced ```json block, the
/// outermost `{...}` slice (models sometimes prepend reasoning text).
/// Total failure is `None` — callers decide what "unparseable" means.
pub fn recover_json<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let raw = raw.trim();
    if let Ok(v) = serde_json::from_str(raw) {
        return Some(v);
    }
    if let Some(v) = fenced_block(raw).and_then(|s| serde_json::from_str(s).ok()) {
        return Some(v);
    }
    outer_object(raw).and_then(|s| serde_json::from_str(s).ok())
}

fn fenced_block(raw: &str) -> Option<&str> {
    let re = Regex::new(r"```(?:json)?\s*(\{[^`]+\})\s*```").ok()?;
    re.captures(raw)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str())
}

fn outer_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}
