//! AI collaborator used when regex extraction finds nothing.
//!
//! The assistant only proposes values. Every answer still goes through the
//! validator before it can touch a record.

use anyhow::{anyhow, Context, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

use crate::config::AiConfig;
use crate::record::FieldType;

/// A value proposed by the assistant with its self-reported confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAnswer {
    pub value: Option<String>,
    /// 0.0 to 1.0
    pub confidence: f32,
}

impl AiAnswer {
    pub fn none() -> Self {
        Self {
            value: None,
            confidence: 0.0,
        }
    }
}

/// Interface to an external model that reads page text and proposes a field value.
pub trait AiAssistant: Send + Sync {
    fn ask_for_field(&self, page_text: &str, org_name: &str, field: FieldType) -> Result<AiAnswer>;
}

const SYSTEM_PROMPT: &str = "You extract contact details of one organization from web page text. \
Reply with a single JSON object {\"value\": string or null, \"confidence\": number between 0 and 1}. \
Use null when the page does not state the requested value for that organization. Never guess.";

/// Chat-completions backed assistant.
///
/// Worker code is synchronous, so requests are driven on the provided runtime
/// handle with `block_on`. Call it from a blocking thread, never from an
/// async task.
pub struct OpenAiAssistant {
    client: Client<OpenAIConfig>,
    model: String,
    max_page_chars: usize,
    request_timeout: Duration,
    handle: Handle,
}

impl OpenAiAssistant {
    /// Build from config, reading the API key from the configured environment variable.
    pub fn from_config(config: &AiConfig, handle: Handle) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("AI assistance enabled but ${} is not set", config.api_key_env))?;
        Ok(Self::new(config, api_key, handle))
    }

    pub fn new(config: &AiConfig, api_key: String, handle: Handle) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
        if !config.api_base.trim().is_empty() {
            openai_config = openai_config.with_api_base(config.api_base.trim());
        }
        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            max_page_chars: config.max_page_chars,
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            handle,
        }
    }

    async fn request(&self, page_text: &str, org_name: &str, field: FieldType) -> Result<String> {
        let excerpt: String = page_text.chars().take(self.max_page_chars).collect();
        let question = match field {
            FieldType::Fax => "fax number",
            FieldType::Phone => "main phone number",
            FieldType::Homepage => "official homepage URL",
        };
        let prompt = format!(
            "Organization: {}\nRequested: {}\n\nPage text:\n{}",
            org_name, question, excerpt
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(SYSTEM_PROMPT)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?
                    .into(),
            ])
            .response_format(ResponseFormat::JsonObject)
            .max_tokens(200_u32)
            .temperature(0.0)
            .build()?;

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| anyhow!("AI request timed out after {:?}", self.request_timeout))??;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| anyhow!("AI response contained no content"))
    }
}

impl AiAssistant for OpenAiAssistant {
    fn ask_for_field(&self, page_text: &str, org_name: &str, field: FieldType) -> Result<AiAnswer> {
        let content = self.handle.block_on(self.request(page_text, org_name, field))?;
        debug!("AI answer for {} of '{}': {}", field, org_name, content);
        parse_answer(&content)
    }
}

#[derive(Deserialize)]
struct RawAnswer {
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Parse the model's reply. Tolerates surrounding prose and code fences.
pub fn parse_answer(content: &str) -> Result<AiAnswer> {
    let start = content.find('{').ok_or_else(|| anyhow!("no JSON object in AI answer"))?;
    let end = content.rfind('}').ok_or_else(|| anyhow!("no JSON object in AI answer"))?;
    if end < start {
        return Err(anyhow!("malformed JSON object in AI answer"));
    }
    let raw: RawAnswer = serde_json::from_str(&content[start..=end]).context("AI answer is not valid JSON")?;

    let value = match raw.value {
        Some(serde_json::Value::String(s)) => Some(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
    .filter(|s| !s.is_empty() && !matches!(s.to_lowercase().as_str(), "null" | "none" | "n/a"));

    let confidence = raw.confidence.unwrap_or(0.0).clamp(0.0, 1.0) as f32;
    Ok(AiAnswer { value, confidence })
}
