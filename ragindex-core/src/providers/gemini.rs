//! Google Gemini REST backends.
//!
//! - `embedContent` for embeddings, with the task type taken from the intent
//! - `generateContent` for answers
//! - `GET /models` for listing generation-capable models
//!
//! Auth is the `?key=API_KEY` query parameter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{DEFAULT_BASE_URL, http_client, map_request_error};
use crate::config::{EmbeddingConfig, GenerationConfig};
use crate::embeddings::{EmbedIntent, EmbeddingBackend};
use crate::error::ProviderError;
use crate::generation::{AnswerGenerator, GenerationRequest};

/// Map an HTTP status code to the appropriate `ProviderError`.
fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::AuthFailed {
            provider: "Gemini".to_string(),
        },
        429 => ProviderError::RateLimited {
            retry_after_secs: 30,
        },
        _ => ProviderError::ApiRequest {
            message: format!("HTTP {} from Gemini API: {}", status, body_text),
        },
    }
}

fn model_path(model: &str) -> &str {
    model.strip_prefix("models/").unwrap_or(model)
}

/// POST `body` and return the parsed JSON response.
async fn post_json(
    client: &Client,
    url: &str,
    body: &Value,
    timeout: Duration,
) -> Result<Value, ProviderError> {
    let response = client
        .post(url)
        .timeout(timeout)
        .json(body)
        .send()
        .await
        .map_err(|e| map_request_error(e, timeout))?;

    let status = response.status();
    let body_text = response.text().await.map_err(|e| ProviderError::ResponseParse {
        message: format!("Failed to read response body: {}", e),
    })?;

    if !status.is_success() {
        return Err(map_http_error(status, &body_text));
    }

    serde_json::from_str(&body_text).map_err(|e| ProviderError::ResponseParse {
        message: format!("Invalid JSON in response: {}", e),
    })
}

/// Gemini `embedContent` backend.
pub struct GeminiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl GeminiEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            client: http_client(timeout)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: model_path(&config.model).to_string(),
            timeout,
        })
    }

    fn request_body(&self, text: &str, intent: EmbedIntent) -> Value {
        json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] },
            "taskType": intent.task_type(),
        })
    }

    fn parse_response(json: &Value) -> Result<Vec<f32>, ProviderError> {
        let values = json["embedding"]["values"]
            .as_array()
            .ok_or_else(|| ProviderError::ResponseParse {
                message: "Missing 'embedding.values' in response".to_string(),
            })?;
        values
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| ProviderError::ResponseParse {
                        message: format!("Non-numeric embedding value: {}", v),
                    })
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiEmbedder {
    async fn embed(&self, text: &str, intent: EmbedIntent) -> Result<Vec<f32>, ProviderError> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url, self.model, self.api_key
        );
        debug!(
            model = self.model.as_str(),
            task_type = intent.task_type(),
            chars = text.len(),
            "Sending Gemini embedding request"
        );
        let response = post_json(
            &self.client,
            &url,
            &self.request_body(text, intent),
            self.timeout,
        )
        .await?;
        Self::parse_response(&response)
    }
}

impl std::fmt::Debug for GeminiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiEmbedder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Gemini `generateContent` backend.
pub struct GeminiGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(Duration::from_secs(config.timeout_secs))?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: model_path(&config.model).to_string(),
        })
    }

    fn request_body(request: &GenerationRequest) -> Value {
        json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_output_tokens,
            },
        })
    }

    /// Concatenate the text parts of the first candidate.
    fn parse_response(json: &Value) -> Result<String, ProviderError> {
        let candidate = json["candidates"]
            .get(0)
            .ok_or_else(|| ProviderError::ResponseParse {
                message: "No candidates in Gemini response".to_string(),
            })?;
        let parts = candidate["content"]["parts"]
            .as_array()
            .ok_or_else(|| ProviderError::ResponseParse {
                message: format!(
                    "Candidate has no content (finishReason: {})",
                    candidate["finishReason"].as_str().unwrap_or("unknown")
                ),
            })?;
        Ok(parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[async_trait]
impl AnswerGenerator for GeminiGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        debug!(
            model = self.model.as_str(),
            max_output_tokens = request.max_output_tokens,
            "Sending Gemini generation request"
        );
        let response = post_json(
            &self.client,
            &url,
            &Self::request_body(&request),
            request.timeout,
        )
        .await?;
        Self::parse_response(&response)
    }
}

impl std::fmt::Debug for GeminiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// A model offered by the API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    /// Model id without the `models/` prefix.
    pub name: String,
    pub display_name: String,
    pub description: String,
}

/// List the models that support `generateContent`.
pub async fn list_models(
    base_url: Option<&str>,
    api_key: &str,
) -> Result<Vec<ModelInfo>, ProviderError> {
    let base_url = base_url.unwrap_or(DEFAULT_BASE_URL);
    let timeout = Duration::from_secs(30);
    let url = format!("{base_url}/models?key={api_key}&pageSize=1000");

    debug!(url = "GET /models", "Fetching models from Gemini API");

    let response = http_client(timeout)?
        .get(&url)
        .send()
        .await
        .map_err(|e| map_request_error(e, timeout))?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(map_http_error(status, &body_text));
    }

    let body: Value = response.json().await.map_err(|e| ProviderError::ResponseParse {
        message: format!("Invalid JSON in Gemini models response: {e}"),
    })?;

    parse_models_response(&body)
}

fn parse_models_response(body: &Value) -> Result<Vec<ModelInfo>, ProviderError> {
    let models = body["models"]
        .as_array()
        .ok_or_else(|| ProviderError::ResponseParse {
            message: "Missing 'models' array in Gemini models response".to_string(),
        })?;

    Ok(models
        .iter()
        .filter(|m| {
            m["supportedGenerationMethods"]
                .as_array()
                .is_some_and(|methods| methods.iter().any(|x| x == "generateContent"))
        })
        .filter_map(|m| {
            let full_name = m["name"].as_str()?;
            Some(ModelInfo {
                name: model_path(full_name).to_string(),
                display_name: m["displayName"].as_str().unwrap_or(full_name).to_string(),
                description: m["description"].as_str().unwrap_or_default().to_string(),
            })
        })
        .collect())
}
