use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::config::Config;
use crate::error::LeadBoxError;

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Generative-text collaborator: prompt in, text out, may fail.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LeadBoxError>;
}

pub fn create_provider(config: &Config) -> Box<dyn TextGenerator> {
    match config.llm_provider.trim().to_lowercase().as_str() {
        "gemini" => Box::new(GeminiProvider::new(config)),
        _ => Box::new(OpenAiProvider::new(config)),
    }
}

const MAX_RETRIES: u32 = 3;

// ---------------------------------------------------------------------------
// Gemini provider
// ---------------------------------------------------------------------------

pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(config: &Config) -> Self {
        GeminiProvider {
            http: reqwest::Client::new(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
            base_url: config
                .llm_base_url
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".into()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

fn gemini_extract_text(response: &GeminiResponse) -> Option<String> {
    let candidate = response.candidates.first()?;
    let content = candidate.content.as_ref()?;
    let text: String = content
        .parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl TextGenerator for GeminiProvider {
    async fn generate(&self, prompt: &str) -> Result<String, LeadBoxError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            urlencoding::encode(&self.api_key)
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });

        let mut retries = 0u32;
        loop {
            let response = self.http.post(&url).json(&body).send().await?;
            let status = response.status();

            if status.is_success() {
                let text = response.text().await?;
                let parsed: GeminiResponse = serde_json::from_str(&text).map_err(|e| {
                    LeadBoxError::TextGen(format!("Failed to parse response: {e}\nBody: {text}"))
                })?;
                return gemini_extract_text(&parsed)
                    .ok_or_else(|| LeadBoxError::TextGen("empty response".into()));
            }

            if status.as_u16() == 429 && retries < MAX_RETRIES {
                retries += 1;
                let delay = std::time::Duration::from_secs(2u64.pow(retries));
                warn!(
                    "Rate limited, retrying in {:?} (attempt {retries}/{MAX_RETRIES})",
                    delay
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let text = response.text().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<ApiErrorEnvelope>(&text) {
                return Err(LeadBoxError::TextGen(err.error.message));
            }
            return Err(LeadBoxError::TextGen(format!("HTTP {status}: {text}")));
        }
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible provider  (OpenAI, OpenRouter, DeepSeek, Groq, Ollama …)
// ---------------------------------------------------------------------------

pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    chat_url: String,
}

impl OpenAiProvider {
    pub fn new(config: &Config) -> Self {
        let base = config
            .llm_base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");
        let chat_url = format!("{}/chat/completions", base.trim_end_matches('/'));

        OpenAiProvider {
            http: reqwest::Client::new(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
            chat_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OaiResponse {
    #[serde(default)]
    choices: Vec<OaiChoice>,
}

#[derive(Debug, Deserialize)]
struct OaiChoice {
    message: OaiMessage,
}

#[derive(Debug, Deserialize)]
struct OaiMessage {
    #[serde(default)]
    content: Option<String>,
}

fn oai_extract_text(response: &OaiResponse) -> Option<String> {
    response
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl TextGenerator for OpenAiProvider {
    async fn generate(&self, prompt: &str) -> Result<String, LeadBoxError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let mut retries = 0u32;
        loop {
            let mut req = self
                .http
                .post(&self.chat_url)
                .header("Content-Type", "application/json")
                .json(&body);
            if !self.api_key.trim().is_empty() {
                req = req.header("Authorization", format!("Bearer {}", self.api_key));
            }
            let response = req.send().await?;
            let status = response.status();

            if status.is_success() {
                let text = response.text().await?;
                let parsed: OaiResponse = serde_json::from_str(&text).map_err(|e| {
                    LeadBoxError::TextGen(format!("Failed to parse response: {e}\nBody: {text}"))
                })?;
                return oai_extract_text(&parsed)
                    .ok_or_else(|| LeadBoxError::TextGen("empty response".into()));
            }

            if status.as_u16() == 429 && retries < MAX_RETRIES {
                retries += 1;
                let delay = std::time::Duration::from_secs(2u64.pow(retries));
                warn!(
                    "Rate limited, retrying in {:?} (attempt {retries}/{MAX_RETRIES})",
                    delay
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let text = response.text().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<ApiErrorEnvelope>(&text) {
                return Err(LeadBoxError::TextGen(err.error.message));
            }
            return Err(LeadBoxError::TextGen(format!("HTTP {status}: {text}")));
        }
    }
}
