use crate::collector::fetcher::build_client;
use crate::collector::retry::with_retry;
use crate::collector::traits::{PatternOracle, SentimentScorer};
use crate::config::OracleConfig;
use crate::model::{CollaboratorError, OracleResponse, ScoredText};
use crate::parser::{extract_score, parse_oracle_response};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

const PATTERN_SYSTEM_PROMPT: &str =
    "You are a market analysis AI. Respond only with valid JSON objects, no additional text or explanations.";

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: String,
}

/// Thin OpenRouter chat-completions client shared by the oracle and the scorer.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    config: OracleConfig,
    api_key: String,
}

impl OpenRouterClient {
    /// Reads the API key from the environment variable named in the config.
    pub fn from_env(config: OracleConfig) -> Result<Self, CollaboratorError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| CollaboratorError::MissingCredentials(config.api_key_env.clone()))?;
        Self::with_key(config, api_key)
    }

    pub fn with_key(config: OracleConfig, api_key: String) -> Result<Self, CollaboratorError> {
        Ok(Self {
            client: build_client(config.timeout_seconds)?,
            config,
            api_key,
        })
    }

    async fn complete_once(&self, request: &ChatRequest<'_>) -> Result<String, CollaboratorError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CollaboratorError::Http(format!("{}: {}", status, body)));
        }
        let parsed: ChatResponse = serde_json::from_str(&body)?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| CollaboratorError::InvalidResponse("no choices in reply".into()))
    }

    async fn complete(&self, request: ChatRequest<'_>) -> Result<String, CollaboratorError> {
        with_retry(request.model, self.config.max_retries, || self.complete_once(&request)).await
    }
}

/// Chart-pattern recognition through a chat model answering in JSON.
pub struct OpenRouterOracle {
    chat: OpenRouterClient,
}

impl OpenRouterOracle {
    pub fn new(chat: OpenRouterClient) -> Self {
        Self { chat }
    }
}

#[async_trait::async_trait]
impl PatternOracle for OpenRouterOracle {
    async fn recognize(&self, prompt: &str) -> Result<OracleResponse, CollaboratorError> {
        let cfg = &self.chat.config;
        info!(model = %cfg.model, "requesting pattern analysis");
        let content = self
            .chat
            .complete(ChatRequest {
                model: &cfg.model,
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: PATTERN_SYSTEM_PROMPT,
                    },
                    ChatMessage {
                        role: "user",
                        content: prompt,
                    },
                ],
                temperature: Some(cfg.temperature),
                max_tokens: Some(cfg.max_tokens),
            })
            .await?;
        debug!(raw = %content, "pattern analysis received");
        parse_oracle_response(&content)
    }
}

/// Per-post sentiment scoring through a reasoning model.
pub struct OpenRouterScorer {
    chat: OpenRouterClient,
}

impl OpenRouterScorer {
    pub fn new(chat: OpenRouterClient) -> Self {
        Self { chat }
    }
}

pub fn scoring_prompt(text: &str) -> String {
    format!(
        "Analyze the sentiment of this market-related text. Follow these steps:\n\
         1. Identify key sentiment indicators\n\
         2. Consider market impact and technical factors\n\
         3. Evaluate overall sentiment\n\
         4. Provide a sentiment score from -1 (very negative) to 1 (very positive)\n\n\
         Text: {}\n\n\
         Provide your analysis in clear steps and end with a line of the form 'Score: <number>'.",
        text
    )
}

#[async_trait::async_trait]
impl SentimentScorer for OpenRouterScorer {
    async fn score(&self, text: &str) -> Result<ScoredText, CollaboratorError> {
        let prompt = scoring_prompt(text);
        let content = self
            .chat
            .complete(ChatRequest {
                model: &self.chat.config.scorer_model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: &prompt,
                }],
                temperature: None,
                max_tokens: None,
            })
            .await?;
        Ok(ScoredText {
            score: extract_score(&content),
            analysis: content,
        })
    }
}

/// Serves repeated prompts from memory for `ttl`; only successful answers are cached.
pub struct CachedOracle<O> {
    inner: O,
    ttl: Duration,
    entries: Mutex<HashMap<String, (DateTime<Utc>, OracleResponse)>>,
}

impl<O: PatternOracle> CachedOracle<O> {
    pub fn new(inner: O, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn cached_entries(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait::async_trait]
impl<O: PatternOracle> PatternOracle for CachedOracle<O> {
    async fn recognize(&self, prompt: &str) -> Result<OracleResponse, CollaboratorError> {
        let now = Utc::now();
        {
            let mut entries = self.entries.lock().await;
            entries.retain(|_, (stored, _)| now - *stored < self.ttl);
            if let Some((_, cached)) = entries.get(prompt) {
                debug!("pattern analysis served from cache");
                return Ok(cached.clone());
            }
        }
        let fresh = self.inner.recognize(prompt).await?;
        self.entries
            .lock()
            .await
            .insert(prompt.to_string(), (now, fresh.clone()));
        Ok(fresh)
    }
}
