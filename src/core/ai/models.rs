use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiMessage {
    pub role: String,
    pub content: String,
}

impl AiMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

impl AiConfig {
    /// Settings for structured extraction: low temperature, short answers.
    pub fn for_extraction(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.1,
            max_tokens: Some(1024),
            top_p: Some(1.0),
        }
    }
}

/// Everything the model sees besides the request itself.
#[derive(Debug, Clone, Default)]
pub struct InferenceContext {
    /// Instructions and the capability schema.
    pub system_prompt: String,
    /// Prior turns, oldest first.
    pub history: Vec<AiMessage>,
}

impl InferenceContext {
    /// Flattens the context into the chat message list most providers expect:
    /// system prompt, history, then the request.
    pub fn to_messages(&self, prompt: &str) -> Vec<AiMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if !self.system_prompt.is_empty() {
            messages.push(AiMessage {
                role: "system".to_string(),
                content: self.system_prompt.clone(),
            });
        }
        messages.extend(self.history.iter().cloned());
        messages.push(AiMessage::user(prompt));
        messages
    }
}

/// Estimates the number of tokens in a text string.
///
/// Uses a simple heuristic: ~4 characters per token on average.
pub fn estimate_tokens(text: &str) -> usize {
    // Round up to be conservative
    (text.len() + 3) / 4
}
