//! OpenAI-compatible chat provider acting as generator and tier classifier.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use coursegraph_core::node::Content;

use crate::collaborators::{CollaboratorError, Generated, Generator, TierClassifier};
use crate::context::{ContextPayload, Tier};

/// Provider settings for [`LlmClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    /// "openrouter" or "openai_compatible".
    pub provider: String,
    pub model: String,
    pub api_base_url: Option<String>,
    pub api_key: Option<String>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiCompatibleChatResponse {
    choices: Vec<OpenAiCompatibleChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiCompatibleChoice {
    message: OpenAiCompatibleMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiCompatibleMessage {
    content: Option<String>,
}

/// Chat-completions client.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        LlmClient {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    async fn chat(&self, user_message: &str, json_mode: bool) -> Result<String, CollaboratorError> {
        let endpoint = chat_endpoint(&self.config)?;
        let api_key = self.config.api_key.clone().unwrap_or_default();

        let mut messages = Vec::new();
        if let Some(system_prompt) = self.config.system_prompt.clone() {
            messages.push(json!({
                "role": "system",
                "content": system_prompt
            }));
        }
        messages.push(json!({
            "role": "user",
            "content": user_message
        }));

        let mut body = json!({
            "model": self.config.model,
            "messages": messages
        });
        if json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let mut req = self
            .http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body);
        if self.config.provider == "openrouter" {
            req = req
                .header("HTTP-Referer", "https://localhost:3000")
                .header("X-Title", "coursegraph");
        }

        let response = req
            .send()
            .await
            .map_err(|err| {
                CollaboratorError::Request(format!("provider request failed: {}", err))
            })?;
        let status = response.status();
        let body_text = response.text().await.map_err(|err| {
            CollaboratorError::Request(format!("provider response read failed: {}", err))
        })?;
        if !status.is_success() {
            return Err(CollaboratorError::Request(format!(
                "provider request failed ({}): {}",
                status, body_text
            )));
        }

        assistant_text(&body_text)
    }
}

#[async_trait]
impl Generator for LlmClient {
    async fn generate(
        &self,
        payload: &ContextPayload,
        instruction: &str,
    ) -> Result<Generated, CollaboratorError> {
        let context = serde_json::to_string(payload)
            .map_err(|err| CollaboratorError::InvalidResponse(err.to_string()))?;
        let message = format!(
            "Rewrite the course node {target} ({kind}).\n\
             Instruction: {instruction}\n\
             Reply with a JSON object {{\"content\": ..., \"metadata\": {{...}}}}.\n\
             Context (the first item is the node itself):\n{context}",
            target = payload.target.id,
            kind = payload.target.kind,
        );
        let text = self.chat(&message, true).await?;
        parse_generated(&text)
    }
}

#[async_trait]
impl TierClassifier for LlmClient {
    async fn classify_tier(&self, instruction: &str) -> Result<Tier, CollaboratorError> {
        let message = format!(
            "Classify how much surrounding course material this edit needs.\n\
             Answer with exactly one word: atomic, local, structural or global.\n\
             Edit: {instruction}"
        );
        let text = self.chat(&message, false).await?;
        parse_tier(&text)
    }
}

fn chat_endpoint(config: &LlmConfig) -> Result<String, CollaboratorError> {
    let base_url = match config.provider.as_str() {
        "openrouter" => config
            .api_base_url
            .clone()
            .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
        "openai_compatible" => config.api_base_url.clone().ok_or_else(|| {
            CollaboratorError::Unavailable(
                "openai_compatible provider requires an api base url".to_string(),
            )
        })?,
        other => {
            return Err(CollaboratorError::Unavailable(format!(
                "unsupported provider '{}': use openrouter or openai_compatible",
                other
            )))
        }
    };
    Ok(format!("{}/chat/completions", base_url.trim_end_matches('/')))
}

fn assistant_text(body_text: &str) -> Result<String, CollaboratorError> {
    let parsed: OpenAiCompatibleChatResponse = serde_json::from_str(body_text).map_err(|err| {
        CollaboratorError::InvalidResponse(format!("provider response parse failed: {}", err))
    })?;
    parsed
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            CollaboratorError::InvalidResponse(
                "provider returned empty assistant content".to_string(),
            )
        })
}

/// Reads `{"content": .., "metadata": ..}`; any other JSON object is taken
/// as the content itself.
fn parse_generated(text: &str) -> Result<Generated, CollaboratorError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|err| {
            CollaboratorError::InvalidResponse(format!("generator output is not JSON: {}", err))
        })?;
    let generated = match value {
        serde_json::Value::Object(mut map) if map.contains_key("content") => Generated {
            content: Content::new(map.remove("content").unwrap_or_default()),
            metadata: map.remove("metadata").unwrap_or_default(),
        },
        other => Generated {
            content: Content::new(other),
            metadata: serde_json::Value::Null,
        },
    };
    if generated.content.is_empty() {
        return Err(CollaboratorError::InvalidResponse(
            "generator returned empty content".to_string(),
        ));
    }
    Ok(generated)
}

fn parse_tier(text: &str) -> Result<Tier, CollaboratorError> {
    let lowered = text.to_ascii_lowercase();
    Tier::ALL
        .into_iter()
        .find(|tier| lowered.contains(tier.as_str()))
        .ok_or_else(|| {
            CollaboratorError::InvalidResponse(format!("no tier in classifier reply '{}'", text))
        })
}
