pub mod intent_resolver;
pub mod models;
pub mod parser;
pub mod prompt;

pub use intent_resolver::IntentResolver;
pub use models::{ClarificationRequest, Intent, Resolution};
