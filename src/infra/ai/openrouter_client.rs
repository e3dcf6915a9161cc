use crate::core::ai::{AiConfig, InferenceContext, InferenceProvider};
use crate::core::errors::ExternalError;
use crate::infra::http::{is_transient_status, is_transient_transport};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

const SOURCE: &str = "openrouter";
const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Chat-completions client for OpenRouter or any OpenAI-compatible endpoint.
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    base_url: String,
    config: AiConfig,
}

impl OpenRouterClient {
    pub fn new(api_key: String, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            config: AiConfig::for_extraction(model),
        }
    }

    /// Points the client at another OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn transport_error(error: reqwest::Error) -> ExternalError {
        if is_transient_transport(&error) {
            ExternalError::transient(SOURCE, error.to_string())
        } else {
            ExternalError::permanent(SOURCE, error.to_string())
        }
    }
}

#[async_trait]
impl InferenceProvider for OpenRouterClient {
    async fn infer(&self, prompt: &str, context: &InferenceContext) -> Result<String, ExternalError> {
        let url = format!("{}/chat/completions", self.base_url);

        let payload = json!({
            "model": self.config.model,
            "messages": context.to_messages(prompt),
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "top_p": self.config.top_p,
        });

        tracing::debug!(
            model = %self.config.model,
            history = context.history.len(),
            "Sending inference request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let detail = format!("{} - {}", status, text);
            return Err(if is_transient_status(status) {
                ExternalError::transient(SOURCE, detail)
            } else {
                ExternalError::permanent(SOURCE, detail)
            });
        }

        let response_json: serde_json::Value =
            response.json().await.map_err(Self::transport_error)?;

        // Extract content
        response_json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ExternalError::permanent(SOURCE, "response had no message content"))
    }
}
