pub mod inference;
pub mod models;

pub use inference::InferenceProvider;
pub use models::{estimate_tokens, AiConfig, AiMessage, InferenceContext};
