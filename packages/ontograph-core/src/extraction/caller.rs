//! Extraction caller: `call(prompt_ref, variables) -> text`
//!
//! `HttpExtractionCaller` talks to any OpenAI-compatible chat-completion
//! endpoint. Prompts live in a [`PromptRegistry`] and are rendered with
//! `{{variable}}` substitution.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::retry::RetryPolicy;
use crate::config::{secret_from_env, ExtractionConfig};

/// Backend call failure (extraction or embedding)
#[derive(Debug, Error)]
pub enum CallError {
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure (DNS, reset, TLS)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Success status with a body we cannot use
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unknown prompt '{0}'")]
    UnknownPrompt(String),

    #[error("Missing prompt variable '{0}'")]
    MissingVariable(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<CallError>,
    },
}

impl CallError {
    /// Transient failures worth another local attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            CallError::Timeout(_) | CallError::Transport(_) => true,
            CallError::Api { status, .. } => *status == 429 || *status >= 500,
            CallError::InvalidResponse(_)
            | CallError::UnknownPrompt(_)
            | CallError::MissingVariable(_)
            | CallError::RetriesExhausted { .. } => false,
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CallError::Timeout(Duration::ZERO)
        } else if err.is_decode() {
            CallError::InvalidResponse(err.to_string())
        } else {
            CallError::Transport(err.to_string())
        }
    }
}

/// Calls an LLM with a named prompt
#[async_trait]
pub trait ExtractionCaller: Send + Sync {
    /// Render `prompt_ref` with `variables` and return the completion text.
    ///
    /// Fails with a [`CallError`] once the local retry budget is spent.
    async fn call(
        &self,
        prompt_ref: &str,
        variables: &HashMap<String, String>,
    ) -> Result<String, CallError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Prompts
// ═══════════════════════════════════════════════════════════════════════════

/// Default prompt for the LLM_PROCESS stage
pub const ONTOLOGY_EXTRACTION_PROMPT: &str = "ontology_extraction";

const ONTOLOGY_SYSTEM: &str = "You extract a bilingual (English/Korean) ontology from text. \
Answer with a single JSON object and nothing else.";

const ONTOLOGY_USER: &str = r#"Extract entities and subject-relation-object triples from the text below.

Return JSON of the form:
{
  "entities": [
    {"category": "...", "term_en": "...", "term_ko": "...", "description": "..."}
  ],
  "triples": [
    {
      "subject":  {"category": "...", "term_en": "...", "term_ko": "..."},
      "relation": {"category": "...", "term_en": "...", "term_ko": "..."},
      "object":   {"category": "...", "term_en": "...", "term_ko": "..."},
      "confidence": 0.0,
      "evidence_level": "EXPLICIT | IMPLIED | INFERRED"
    }
  ]
}

Document: {{title}}

Text:
{{content}}"#;

#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub system: String,
    pub user: String,
}

/// Named prompt templates
#[derive(Debug, Clone, Default)]
pub struct PromptRegistry {
    templates: HashMap<String, PromptTemplate>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in ontology extraction prompt
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ONTOLOGY_EXTRACTION_PROMPT, ONTOLOGY_SYSTEM, ONTOLOGY_USER);
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
    ) {
        self.templates.insert(
            name.into(),
            PromptTemplate {
                system: system.into(),
                user: user.into(),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Substitute every `{{key}}`; a placeholder without a value is an error
    pub fn render(
        &self,
        name: &str,
        variables: &HashMap<String, String>,
    ) -> Result<PromptTemplate, CallError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| CallError::UnknownPrompt(name.to_string()))?;
        Ok(PromptTemplate {
            system: substitute(&template.system, variables)?,
            user: substitute(&template.user, variables)?,
        })
    }
}

fn substitute(template: &str, variables: &HashMap<String, String>) -> Result<String, CallError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let key = after[..end].trim();
        let value = variables
            .get(key)
            .ok_or_else(|| CallError::MissingVariable(key.to_string()))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

// ═══════════════════════════════════════════════════════════════════════════
// HTTP adapter
// ═══════════════════════════════════════════════════════════════════════════

/// OpenAI-compatible chat-completion client
pub struct HttpExtractionCaller {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    prompts: PromptRegistry,
    retry: RetryPolicy,
}

impl HttpExtractionCaller {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        retry: RetryPolicy,
    ) -> Result<Self, CallError> {
        let client = reqwest::Client::builder()
            .timeout(retry.timeout)
            .build()
            .map_err(|e| CallError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            prompts: PromptRegistry::with_defaults(),
            retry,
        })
    }

    /// Build from config; the API key is read from `api_key_env`
    pub fn from_config(config: &ExtractionConfig) -> crate::Result<Self> {
        let api_key = secret_from_env(&config.api_key_env)?;
        let retry = RetryPolicy::new(config.max_retries, config.backoff_ms, config.timeout_secs);
        Ok(Self::new(&config.base_url, &config.model, Some(api_key), retry)?)
    }

    pub fn with_prompts(mut self, prompts: PromptRegistry) -> Self {
        self.prompts = prompts;
        self
    }

    async fn send(&self, prompt: &PromptTemplate) -> Result<String, CallError> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": &prompt.system},
                {"role": "user", "content": &prompt.user}
            ],
            "temperature": 0.0,
            "response_format": {"type": "json_object"}
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Api { status, body });
        }

        #[derive(Deserialize)]
        struct Message {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            choices: Vec<Choice>,
        }

        let api_response: ApiResponse = response.json().await?;
        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CallError::InvalidResponse("completion has no content".to_string()))
    }
}

#[async_trait]
impl ExtractionCaller for HttpExtractionCaller {
    async fn call(
        &self,
        prompt_ref: &str,
        variables: &HashMap<String, String>,
    ) -> Result<String, CallError> {
        let prompt = self.prompts.render(prompt_ref, variables)?;
        let text = self.retry.run(prompt_ref, || self.send(&prompt)).await?;
        debug!(prompt_ref, chars = text.len(), "Extraction call completed");
        Ok(text)
    }
}
