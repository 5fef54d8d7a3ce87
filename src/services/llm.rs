use crate::core::config::resolve_secret;
use crate::core::error::StoryError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant for writing children's books.";

// --- Config ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String, // "nvidia", "openai", "gemini" or "ollama"
    #[serde(default)]
    pub nvidia: NvidiaLlmConfig,
    pub gemini: Option<GeminiConfig>,
    pub ollama: Option<OllamaConfig>,
    pub openai: Option<OpenAIConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            nvidia: NvidiaLlmConfig::default(),
            gemini: None,
            ollama: None,
            openai: None,
        }
    }
}

/// NVIDIA NIM speaks the OpenAI chat protocol.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NvidiaLlmConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_nvidia_model")]
    pub model: String,
    #[serde(default = "default_nvidia_base_url")]
    pub base_url: String,
}

impl Default for NvidiaLlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_nvidia_model(),
            base_url: default_nvidia_base_url(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

fn default_provider() -> String {
    "nvidia".to_string()
}
fn default_nvidia_model() -> String {
    "meta/llama3-70b-instruct".to_string()
}
fn default_nvidia_base_url() -> String {
    "https://integrate.api.nvidia.com/v1".to_string()
}

// --- Client ---

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn chat(&self, system: &str, user: &str) -> Result<String>;

    /// Plain text completion of a single prompt.
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.chat(DEFAULT_SYSTEM_PROMPT, prompt).await
    }
}

pub fn create_llm(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "nvidia" => {
            let cfg = &config.nvidia;
            // Resumed runs may never reach the model, so a missing key is not fatal here.
            let api_key = resolve_secret(cfg.api_key.as_deref(), "NVIDIA_API_KEY").unwrap_or_else(|e| {
                warn!("{:#}; language model calls will be rejected", e);
                String::new()
            });
            Ok(Box::new(OpenAIClient::new(
                "NVIDIA NIM",
                &api_key,
                &cfg.model,
                Some(&cfg.base_url),
            )))
        }
        "openai" => {
            let cfg = config.openai.as_ref().context("OpenAI config missing")?;
            Ok(Box::new(OpenAIClient::new(
                "OpenAI",
                &cfg.api_key,
                &cfg.model,
                cfg.base_url.as_deref(),
            )))
        }
        "gemini" => {
            let cfg = config.gemini.as_ref().context("Gemini config missing")?;
            Ok(Box::new(GeminiClient::new(&cfg.api_key, &cfg.model)))
        }
        "ollama" => {
            let cfg = config.ollama.as_ref().context("Ollama config missing")?;
            Ok(Box::new(OllamaClient::new(&cfg.base_url, &cfg.model)))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.provider)),
    }
}

// --- Gemini ---
#[derive(Debug)]
struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

impl GeminiResponse {
    fn into_text(self) -> Result<String> {
        if let Some(err) = self.error {
            return Err(StoryError::backend("Gemini", err.message).into());
        }
        let first = self
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| anyhow!("Gemini response has no candidates"))?;
        if let Some(part) = first.content.and_then(|c| c.parts.into_iter().next()) {
            return Ok(part.text);
        }
        let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
        Err(StoryError::backend("Gemini", format!("empty response, finish reason: {}", reason)).into())
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: user.to_string(),
                }],
            }],
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiPart {
                    text: system.to_string(),
                }],
            }),
        };

        let resp = self.client.post(&url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(StoryError::backend("Gemini", error_text).into());
        }

        let response_text = resp.text().await?;
        let result: GeminiResponse = serde_json::from_str(&response_text).map_err(|e| {
            anyhow!("Failed to parse Gemini response: {}. Body: {}", e, response_text)
        })?;
        result.into_text()
    }
}

// --- Ollama ---
#[derive(Debug)]
struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn request(&self, system: &str, user: &str) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            messages: ChatMessage::pair(system, user),
            stream: false,
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
}

#[derive(Deserialize)]
struct OllamaMessageResponse {
    content: String,
}

impl OllamaResponse {
    fn into_text(self) -> Result<String> {
        if self.message.content.trim().is_empty() {
            return Err(StoryError::backend("Ollama", "empty message content").into());
        }
        Ok(self.message.content)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let resp = self
            .client
            .post(self.chat_url())
            .json(&self.request(system, user))
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(StoryError::backend("Ollama", error_text).into());
        }

        let result: OllamaResponse = resp.json().await?;
        result.into_text()
    }
}

// --- OpenAI compatible (OpenAI, NVIDIA NIM) ---

#[derive(Debug)]
struct OpenAIClient {
    label: &'static str,
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(label: &'static str, api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            label,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn pair(system: &str, user: &str) -> Vec<Self> {
        vec![
            Self {
                role: "system".to_string(),
                content: system.to_string(),
            },
            Self {
                role: "user".to_string(),
                content: user.to_string(),
            },
        ]
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

impl OpenAIResponse {
    fn into_text(self) -> Option<String> {
        self.choices.into_iter().next().and_then(|c| c.message.content)
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!("{} request ({} chars)", self.label, user.len());

        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages: ChatMessage::pair(system, user),
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(StoryError::backend(self.label, error_text).into());
        }

        let result: OpenAIResponse = resp.json().await?;
        result
            .into_text()
            .ok_or_else(|| StoryError::backend(self.label, "response empty or missing content").into())
    }
}
