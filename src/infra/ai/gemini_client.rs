// =============================================================================
// GEMINI CLIENT
// =============================================================================
//
// Inference provider backed by Google's Gemini generateContent endpoint.
//
// Differences from the OpenAI-style chat format:
// - The system prompt travels in `systemInstruction`, not as a message
// - Messages are `contents[]` with nested `parts`
// - The assistant role is called "model"
// - The API key goes in the query string
//
// Intent extraction asks for `application/json` output so the model does not
// wrap its answer in prose.

use crate::core::ai::{AiConfig, AiMessage, InferenceContext, InferenceProvider};
use crate::core::errors::ExternalError;
use crate::infra::http::{is_transient_status, is_transient_transport};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const SOURCE: &str = "gemini";

// =============================================================================
// GEMINI API DATA STRUCTURES
// =============================================================================
//
// See: https://ai.google.dev/api/generate-content

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

/// A message in Gemini's format.
#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(default)]
struct Content {
    /// "user" or "model"
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,

    /// Why the model stopped, e.g. "STOP" or "SAFETY".
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorDetail,
}

// =============================================================================
// GEMINI CLIENT IMPLEMENTATION
// =============================================================================

pub struct GeminiClient {
    client: Client,

    /// API key from https://aistudio.google.com/apikey
    api_key: String,

    config: AiConfig,
}

impl GeminiClient {
    pub fn new(api_key: String, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key,
            config: AiConfig::for_extraction(model),
        }
    }

    fn text_part(text: String) -> Part {
        Part { text: Some(text) }
    }

    /// Converts our `AiMessage` to Gemini's `Content`, renaming "assistant"
    /// to "model".
    fn convert_message(msg: &AiMessage) -> Content {
        let role = match msg.role.as_str() {
            "assistant" => "model".to_string(),
            other => other.to_string(),
        };

        Content {
            role,
            parts: vec![Self::text_part(msg.content.clone())],
        }
    }

    fn build_request(&self, prompt: &str, context: &InferenceContext) -> GenerateContentRequest {
        let system_instruction = if context.system_prompt.is_empty() {
            None
        } else {
            Some(Content {
                role: "user".to_string(), // System instruction uses "user" role internally
                parts: vec![Self::text_part(context.system_prompt.clone())],
            })
        };

        let mut contents: Vec<Content> = context.history.iter().map(Self::convert_message).collect();
        contents.push(Self::convert_message(&AiMessage::user(prompt)));

        GenerateContentRequest {
            contents,
            system_instruction,
            generation_config: Some(GenerationConfig {
                temperature: Some(self.config.temperature),
                max_output_tokens: self.config.max_tokens,
                top_p: self.config.top_p,
                response_mime_type: Some("application/json".to_string()),
            }),
        }
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
impl InferenceProvider for GeminiClient {
    async fn infer(&self, prompt: &str, context: &InferenceContext) -> Result<String, ExternalError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.config.model, self.api_key
        );

        let request = self.build_request(prompt, context);

        // Never log the URL, it carries the key.
        tracing::debug!(
            "Gemini request to model {}: {} contents",
            self.config.model,
            request.contents.len()
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            let message = match serde_json::from_str::<GeminiErrorResponse>(&error_text) {
                Ok(error_response) => error_response.error.message,
                Err(_) => error_text,
            };
            let detail = format!("{} - {}", status, message);

            return Err(if is_transient_status(status) {
                ExternalError::transient(SOURCE, detail)
            } else {
                ExternalError::permanent(SOURCE, detail)
            });
        }

        let response_json: GenerateContentResponse =
            response.json().await.map_err(Self::transport_error)?;

        let candidate = response_json
            .candidates
            .as_ref()
            .and_then(|c| c.first())
            .ok_or_else(|| {
                ExternalError::permanent(
                    SOURCE,
                    "no candidates in response, the prompt may have been blocked",
                )
            })?;

        // With thinking enabled the last text part is the answer.
        let content = candidate
            .content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .last()
            .unwrap_or_default()
            .to_string();

        if content.is_empty() {
            return Err(ExternalError::permanent(
                SOURCE,
                format!(
                    "empty answer (finish reason {})",
                    candidate.finish_reason.as_deref().unwrap_or("unknown")
                ),
            ));
        }

        tracing::debug!("Gemini response received: {} chars", content.len());
        Ok(content)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_message_assistant_to_model() {
        let content = GeminiClient::convert_message(&AiMessage::assistant("Hi there!"));

        assert_eq!(content.role, "model");
        assert_eq!(content.parts[0].text, Some("Hi there!".to_string()));
    }

    #[test]
    fn request_moves_system_prompt_out_of_contents() {
        let client = GeminiClient::new("key".to_string(), "gemini-2.5-flash");
        let context = InferenceContext {
            system_prompt: "catalog".to_string(),
            history: vec![AiMessage::user("earlier"), AiMessage::assistant("done")],
        };

        let request = client.build_request("now", &context);

        let roles: Vec<&str> = request.contents.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(
            request.system_instruction.unwrap().parts[0].text.as_deref(),
            Some("catalog")
        );
    }

    #[test]
    fn test_generation_config_serialization() {
        let client = GeminiClient::new("key".to_string(), "gemini-2.5-flash");
        let request = client.build_request("hello", &InferenceContext::default());

        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains("\"maxOutputTokens\""));
        assert!(json.contains("\"responseMimeType\":\"application/json\""));
        assert!(!json.contains("systemInstruction"));
    }

    #[test]
    fn candidate_without_content_still_parses() {
        let raw = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let candidate = &parsed.candidates.unwrap()[0];
        assert!(candidate.content.parts.is_empty());
        assert_eq!(candidate.finish_reason.as_deref(), Some("SAFETY"));
    }
}
