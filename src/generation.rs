//! Generation collaborator: an OpenAI-compatible chat-completions client.
//!
//! The pipeline only needs "bounded text in, text out", so [`Generator`]
//! takes a system instruction and a user message. Prompts for grounded
//! answers, question condensing, and metadata extraction live here too.

use anyhow::{bail, Context};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use campus_rag_core::context::ContextBundle;
use campus_rag_core::{RagError, Result};

use crate::config::GenerationConfig;
use crate::retry::{network_error, status_error, with_backoff, RetryPolicy};

/// Reply when the knowledge base has nothing relevant.
pub const NO_EVIDENCE_REPLY: &str = "Based on my knowledge database, I could not find specific \
information about that. Please contact the program office for help.";

/// Reply when a turn fails after retries.
pub const FAILURE_REPLY: &str =
    "Sorry, I could not process your question right now. Please try again in a moment.";

pub const ANSWER_INSTRUCTION: &str = "You are an administrative assistant for university students. \
Answer questions strictly based on the provided context from university documents. \
Do not use external knowledge or make assumptions beyond what is written in the context.\n\
1. Read the question and the context carefully.\n\
2. Give a concise, direct answer using ONLY information found in the context.\n\
3. If several context passages are relevant, combine them into one coherent answer.\n\
4. Refer to sources by their bracketed numbers, e.g. [1].\n\
5. If the answer is not in the context, say explicitly that the knowledge base \
has no specific information about it and suggest contacting the program office.";

pub const CONDENSE_INSTRUCTION: &str = "Given a chat history and the latest user question, \
which might reference context in the chat history, formulate a standalone question \
which can be understood without the chat history. Do NOT answer the question, \
just reformulate it if needed and otherwise return it as is.";

pub const METADATA_INSTRUCTION: &str = "Extract the title of the document and summarize the main topics. \
Respond in JSON format with keys \"title\" (string) and \"topics\" (string, comma-separated). \
Example: {\"title\": \"Document Name\", \"topics\": \"topic1, topic2, topic3\"}.";

/// Text-in, text-out language model.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Used when `generation.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Err(RagError::Configuration(
            "Generation provider is disabled".to_string(),
        ))
    }
}

/// `POST {url}/chat/completions` with bearer auth.
pub struct OpenAiGenerator {
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &GenerationConfig, api_key: String) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .context("generation.model required for openai provider")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            url,
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let endpoint = format!("{}/chat/completions", self.url);
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        let (client, api_key, endpoint, body) = (&self.client, &self.api_key, &endpoint, &body);

        let json = with_backoff(self.retry, "chat completion", move || async move {
            let resp = client
                .post(endpoint)
                .header("Authorization", format!("Bearer {}", api_key))
                .json(body)
                .send()
                .await
                .map_err(|e| network_error("chat completion", e))?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(status_error("chat completion", status, &text));
            }
            resp.json::<serde_json::Value>()
                .await
                .map_err(|e| network_error("chat completion", e))
        })
        .await?;

        parse_completion(&json)
    }
}

fn parse_completion(json: &serde_json::Value) -> Result<String> {
    let text = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing choices[0].message.content"))?;
    Ok(text.trim().to_string())
}

/// Build the configured generator.
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

/// User message for a grounded answer: history, then numbered evidence,
/// then the question.
pub fn answer_prompt(bundle: &ContextBundle, question: &str) -> String {
    let mut out = String::new();
    if !bundle.history.is_empty() {
        out.push_str("Conversation so far:\n");
        out.push_str(&bundle.render_history());
        out.push_str("\n\n");
    }
    out.push_str("Context:\n-----\n");
    out.push_str(&bundle.render_passages());
    out.push_str("\n-----\nQuestion: ");
    out.push_str(question);
    out.push_str("\nAnswer:");
    out
}

pub fn condense_prompt(history: &str, question: &str) -> String {
    format!("Chat history:\n{}\n\nLatest question: {}", history, question)
}

/// Title and topics suggested by the model for a document.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ExtractedMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub topics: Option<String>,
}

/// Parse a metadata reply, tolerating a surrounding ```json fence.
pub fn parse_metadata_reply(reply: &str) -> Option<ExtractedMetadata> {
    let cleaned = reply.trim();
    let cleaned = cleaned
        .strip_prefix("```json")
        .or_else(|| cleaned.strip_prefix("```"))
        .unwrap_or(cleaned);
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned).trim();
    serde_json::from_str(cleaned).ok()
}
