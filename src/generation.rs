//! Generation provider implementations.
//!
//! - **[`DisabledGenerator`]**: fails every call; `ask` is unavailable.
//! - **[`OpenAIGenerator`]**: OpenAI chat completions (or any compatible
//!   endpoint), same retry policy as the embedding providers.
//!
//! Both implement [`GenerationProvider`] from `prompt-rag-core`; the
//! grounding instruction itself comes from
//! [`render_prompt`](prompt_rag_core::generation::render_prompt).

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use prompt_rag_core::generation::{render_prompt, GenerationProvider, GenerationRequest};

use crate::config::GenerationConfig;
use crate::http;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

pub struct DisabledGenerator;

#[async_trait]
impl GenerationProvider for DisabledGenerator {
    fn provider_name(&self) -> &str {
        "disabled"
    }
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        bail!("Generation provider is disabled")
    }
}

/// Answer synthesis through `POST {api_base}/chat/completions`.
///
/// Requires `OPENAI_API_KEY`.
pub struct OpenAIGenerator {
    model: String,
    temperature: f32,
    endpoint: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base = config.api_base.as_deref().unwrap_or(OPENAI_API_BASE);

        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAIGenerator {
    fn provider_name(&self) -> &str {
        "openai"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let messages = render_prompt(request);
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": messages.system},
                {"role": "user", "content": messages.user},
            ],
        });
        let json = http::post_json_with_retry(
            &self.client,
            &self.endpoint,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_chat_response(&json)
    }
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))?;
    Ok(content.trim().to_string())
}

/// Create the configured [`GenerationProvider`].
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prompt_rag_core::models::Language;
    use serde_json::json;

    #[test]
    fn test_parse_chat_response() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "  Use p2.\n"}}]
        });
        assert_eq!(parse_chat_response(&body).unwrap(), "Use p2.");
    }

    #[test]
    fn test_parse_chat_response_missing_content() {
        assert!(parse_chat_response(&json!({"choices": []})).is_err());
    }

    #[tokio::test]
    async fn test_disabled_generator_errors() {
        let generator = create_generator(&GenerationConfig::default()).unwrap();
        let req = GenerationRequest {
            query: "q".to_string(),
            language: Language::En,
            context: vec![],
        };
        assert!(generator.generate(&req).await.is_err());
    }
}
