use super::models::InferenceContext;
use crate::core::errors::ExternalError;
use async_trait::async_trait;

/// The language model behind intent resolution.
///
/// Implementations turn a prompt plus context into raw text. They should
/// classify their own failures: rate limits, timeouts and 5xx responses as
/// transient, everything else as permanent.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn infer(&self, prompt: &str, context: &InferenceContext)
        -> Result<String, ExternalError>;
}

// Blanket implementation for Box<dyn InferenceProvider>
// This lets the composition root pick OpenRouter or Gemini at runtime while
// the services stay generic.
#[async_trait]
impl InferenceProvider for Box<dyn InferenceProvider> {
    async fn infer(
        &self,
        prompt: &str,
        context: &InferenceContext,
    ) -> Result<String, ExternalError> {
        (**self).infer(prompt, context).await
    }
}

#[async_trait]
impl<P: InferenceProvider + ?Sized> InferenceProvider for std::sync::Arc<P> {
    async fn infer(
        &self,
        prompt: &str,
        context: &InferenceContext,
    ) -> Result<String, ExternalError> {
        (**self).infer(prompt, context).await
    }
}
