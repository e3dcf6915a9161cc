use super::models::{ClarificationRequest, Intent, Resolution};
use super::parser::parse_inference;
use super::prompt::{build_history, build_system_prompt};
use crate::core::ai::{InferenceContext, InferenceProvider};
use crate::core::config::RouterConfig;
use crate::core::context::Session;
use crate::core::errors::{ExternalError, RouterError};
use crate::core::registry::CapabilityRegistry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Turns free text plus session context into an intent, or a question.
///
/// Generic over the provider so tests can drive it with a scripted stub.
pub struct IntentResolver<P: InferenceProvider> {
    provider: P,
    registry: Arc<CapabilityRegistry>,
    confidence_threshold: f64,
    history_turns: usize,
    history_token_budget: usize,
    call_timeout: Duration,
}

impl<P: InferenceProvider> IntentResolver<P> {
    pub fn new(provider: P, registry: Arc<CapabilityRegistry>, config: &RouterConfig) -> Self {
        Self {
            provider,
            registry,
            confidence_threshold: config.confidence_threshold,
            history_turns: config.history_turns,
            history_token_budget: config.history_token_budget,
            call_timeout: config.call_timeout,
        }
    }

    /// One resolution attempt.
    ///
    /// `Err` only for inference failures (the call itself failed or timed
    /// out). Anything wrong with the answer becomes a clarification.
    pub async fn resolve(
        &self,
        request_text: &str,
        session: &Session,
    ) -> Result<Resolution, RouterError> {
        let context = InferenceContext {
            system_prompt: build_system_prompt(&self.registry, session, Utc::now()),
            history: build_history(session, self.history_turns, self.history_token_budget),
        };

        let raw = tokio::time::timeout(self.call_timeout, self.provider.infer(request_text, &context))
            .await
            .map_err(|_| {
                ExternalError::transient(
                    "inference",
                    format!("no answer within {}s", self.call_timeout.as_secs_f32()),
                )
            })??;

        tracing::debug!(session_id = %session.id, "Inference answered: {}", raw);

        match parse_inference(&raw, &self.registry, &session.entities) {
            Ok(Resolution::Resolved(intent)) if intent.confidence() < self.confidence_threshold => {
                tracing::info!(
                    session_id = %session.id,
                    intent = %intent.label(),
                    confidence = intent.confidence(),
                    threshold = self.confidence_threshold,
                    "Confidence below threshold, asking instead"
                );
                Ok(Resolution::ClarificationNeeded(low_confidence_question(&intent)))
            }
            Ok(resolution) => Ok(resolution),
            Err(err) => {
                tracing::info!(session_id = %session.id, "Could not use inference output: {}", err);
                Ok(Resolution::ClarificationNeeded(ClarificationRequest {
                    question: err.clarifying_question(),
                    reason: err.to_string(),
                }))
            }
        }
    }
}

fn low_confidence_question(intent: &Intent) -> ClarificationRequest {
    let action = match intent.operation().as_str() {
        "list_items" => "list",
        "get_item" => "open",
        "create_item" => "create",
        "update_item" => "change",
        "delete_item" => "delete",
        other => other,
    }
    .replace('_', " ");

    ClarificationRequest {
        question: format!(
            "I'm not sure I understood. Do you want me to {} something in {}? Could you say a bit more about what you need?",
            action,
            intent.capability()
        ),
        reason: format!(
            "confidence {:.2} for {} is below threshold",
            intent.confidence(),
            intent.label()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::{workspace_catalog, Operation};
    use crate::core::testing::{intent_json, ScriptedInference};
    use serde_json::json;

    fn resolver(script: ScriptedInference) -> (IntentResolver<Arc<ScriptedInference>>, Arc<ScriptedInference>) {
        let script = Arc::new(script);
        let config = RouterConfig {
            call_timeout: Duration::from_millis(200),
            ..RouterConfig::default()
        };
        let resolver = IntentResolver::new(
            Arc::clone(&script),
            Arc::new(workspace_catalog().unwrap()),
            &config,
        );
        (resolver, script)
    }

    #[tokio::test]
    async fn list_next_five_events_from_empty_context() {
        let (resolver, _) = resolver(ScriptedInference::replies(vec![intent_json(
            "calendar",
            "list_items",
            json!({"max_results": 5}),
            0.95,
        )]));
        let session = Session::new("s");

        match resolver
            .resolve("list my next 5 calendar events", &session)
            .await
            .unwrap()
        {
            Resolution::Resolved(intent) => {
                assert_eq!(intent.capability(), "calendar");
                assert_eq!(intent.operation(), &Operation::ListItems);
                assert_eq!(intent.parameter("max_results"), Some(&json!(5)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn low_confidence_becomes_clarification() {
        let (resolver, _) = resolver(ScriptedInference::replies(vec![intent_json(
            "storage",
            "delete_item",
            json!({"id": "f1"}),
            0.2,
        )]));
        let resolution = resolver.resolve("get rid of that", &Session::new("s")).await.unwrap();
        assert!(matches!(resolution, Resolution::ClarificationNeeded(_)));
    }

    #[tokio::test]
    async fn malformed_output_becomes_clarification() {
        let (resolver, _) = resolver(ScriptedInference::replies(vec![
            "I'd love to help!".to_string(),
        ]));
        match resolver.resolve("hello", &Session::new("s")).await.unwrap() {
            Resolution::ClarificationNeeded(req) => assert!(req.question.ends_with('?')),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn inference_failure_is_an_error() {
        let (resolver, _) = resolver(ScriptedInference::new(vec![Err(
            ExternalError::transient("inference", "429 rate limited"),
        )]));
        let err = resolver.resolve("hi", &Session::new("s")).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn slow_inference_times_out_as_transient() {
        let (resolver, _) = resolver(
            ScriptedInference::replies(vec![intent_json("mail", "list_items", json!({}), 0.9)])
                .with_delay(Duration::from_secs(5)),
        );
        let err = resolver.resolve("mail", &Session::new("s")).await.unwrap_err();
        assert_eq!(err.kind(), "transient_external_error");
    }

    #[tokio::test]
    async fn prompt_carries_schema_history_and_entities() {
        let (resolver, script) = resolver(ScriptedInference::replies(vec![intent_json(
            "document",
            "get_item",
            json!({"id": "it"}),
            0.9,
        )]));
        let mut session = Session::new("s");
        session.remember("document.last_id", "doc-7");
        session.push_turn(
            crate::core::context::ConversationTurn::clarification("make a doc", "Titled what?"),
            10,
        );

        resolver.resolve("open it", &session).await.unwrap();

        let context = script.last_context().unwrap();
        assert!(context.system_prompt.contains("append_text"));
        assert!(context.system_prompt.contains("@document.last_id = doc-7"));
        assert_eq!(context.history.len(), 2);
        assert_eq!(script.prompts(), vec!["open it".to_string()]);
    }
}
