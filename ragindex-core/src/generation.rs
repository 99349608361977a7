//! Answer-generation capability.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::error::ProviderError;

/// One generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl GenerationRequest {
    /// A request for `prompt` with the limits from `config`.
    pub fn from_config(prompt: String, config: &GenerationConfig) -> Self {
        Self {
            prompt,
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// A remote service producing answer text from a prompt.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError>;
}

/// Offline generator that returns a fixed answer and records prompts.
#[derive(Debug)]
pub struct MockAnswerGenerator {
    answer: Result<String, ProviderError>,
    prompts: Mutex<Vec<String>>,
}

impl MockAnswerGenerator {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: Ok(answer.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A generator whose every call fails with `err`.
    pub fn failing(err: ProviderError) -> Self {
        Self {
            answer: Err(err),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AnswerGenerator for MockAnswerGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt);
        }
        self.answer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_config() {
        let req = GenerationRequest::from_config("p".into(), &GenerationConfig::default());
        assert_eq!(req.max_output_tokens, 512);
        assert_eq!(req.temperature, 0.0);
        assert_eq!(req.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_mock_records_prompt() {
        let generator = MockAnswerGenerator::new("42");
        let req = GenerationRequest::from_config("why?".into(), &GenerationConfig::default());
        assert_eq!(generator.generate(req).await.unwrap(), "42");
        assert_eq!(generator.prompts(), vec!["why?".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let generator = MockAnswerGenerator::failing(ProviderError::Timeout { timeout_secs: 30 });
        let req = GenerationRequest::from_config("q".into(), &GenerationConfig::default());
        assert!(matches!(
            generator.generate(req).await,
            Err(ProviderError::Timeout { .. })
        ));
    }
}
