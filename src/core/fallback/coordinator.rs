use super::pipeline_state::{advance, PipelineEvent, PipelineState};
use super::retry_policy::RetryPolicy;
use crate::core::ai::InferenceProvider;
use crate::core::context::{ConversationTurn, SessionHandle};
use crate::core::dispatch::{DispatchResult, Dispatcher};
use crate::core::errors::RouterError;
use crate::core::intent::{ClarificationRequest, Intent, IntentResolver, Resolution};

/// How a turn ended, as seen by the facade.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Completed { intent: Intent, result: DispatchResult },
    Clarification(ClarificationRequest),
    Failed { intent: Option<Intent>, error: RouterError },
}

/// Drives resolve and dispatch through the pipeline state machine.
pub struct FallbackCoordinator<P: InferenceProvider> {
    resolver: IntentResolver<P>,
    dispatcher: Dispatcher,
    policy: RetryPolicy,
}

impl<P: InferenceProvider> FallbackCoordinator<P> {
    pub fn new(resolver: IntentResolver<P>, dispatcher: Dispatcher, policy: RetryPolicy) -> Self {
        Self {
            resolver,
            dispatcher,
            policy,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Runs one request to a terminal state.
    ///
    /// Dispatch attempts are recorded by the dispatcher. Turns that never got
    /// that far (clarifications, inference failures) are recorded here.
    pub async fn run(&self, session: &mut SessionHandle, request_text: &str) -> PipelineOutcome {
        let mut state = PipelineState::start();

        while !state.is_terminal() {
            let event = match &state {
                PipelineState::Resolving { attempt } => {
                    tracing::debug!(session_id = %session.id, attempt, "Resolving intent");
                    match self.resolver.resolve(request_text, &**session).await {
                        Ok(Resolution::Resolved(intent)) => PipelineEvent::Resolved(intent),
                        Ok(Resolution::ClarificationNeeded(request)) => {
                            PipelineEvent::ClarificationNeeded(request)
                        }
                        Err(error) => PipelineEvent::ResolveFailed(error),
                    }
                }
                PipelineState::Dispatching { intent, attempt } => {
                    match self
                        .dispatcher
                        .dispatch(session, request_text, intent, *attempt)
                        .await
                    {
                        Ok(result) if result.success => PipelineEvent::Dispatched(result),
                        Ok(DispatchResult {
                            error: Some(error), ..
                        }) => PipelineEvent::DispatchFailed {
                            error,
                            retry_safe: self.dispatcher.is_retry_safe(intent),
                        },
                        Ok(result) => PipelineEvent::Dispatched(result),
                        Err(error) => PipelineEvent::DispatchRejected(error),
                    }
                }
                PipelineState::Retrying {
                    target,
                    attempt,
                    delay,
                } => {
                    let wait = self.policy.jittered(*delay);
                    tracing::warn!(
                        session_id = %session.id,
                        next_attempt = attempt,
                        delay_ms = wait.as_millis() as u64,
                        retrying = ?target,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    PipelineEvent::BackoffElapsed
                }
                // Terminal states end the loop above.
                _ => break,
            };

            state = advance(state, event, &self.policy);
        }

        match state {
            PipelineState::Done { intent, result } => PipelineOutcome::Completed { intent, result },
            PipelineState::ClarificationPending(request) => {
                session
                    .append(ConversationTurn::clarification(request_text, &request.question))
                    .await;
                PipelineOutcome::Clarification(request)
            }
            PipelineState::Failed { intent, error } => {
                // Dispatch-stage failures were already recorded by the dispatcher.
                if intent.is_none() {
                    session
                        .append(ConversationTurn::failed(request_text, &error))
                        .await;
                }
                tracing::warn!(
                    session_id = %session.id,
                    error_kind = error.kind(),
                    "Request failed: {}",
                    error
                );
                PipelineOutcome::Failed { intent, error }
            }
            other => {
                // Unreachable in practice: the loop only exits on terminal states.
                let error = RouterError::External(crate::core::errors::ExternalError::permanent(
                    "pipeline",
                    format!("stopped in state {}", other.name()),
                ));
                PipelineOutcome::Failed { intent: None, error }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RouterConfig;
    use crate::core::context::{ContextStore, TurnOutcome};
    use crate::core::dispatch::ServiceError;
    use crate::core::registry::{workspace_catalog, Operation};
    use crate::core::testing::{intent_json, RecordingClient, ScriptedInference};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn coordinator(
        script: ScriptedInference,
        clients: Vec<Arc<RecordingClient>>,
    ) -> FallbackCoordinator<ScriptedInference> {
        let registry = Arc::new(workspace_catalog().unwrap());
        let config = RouterConfig {
            call_timeout: Duration::from_millis(200),
            ..RouterConfig::default()
        };
        let mut dispatcher = Dispatcher::new(Arc::clone(&registry), config.call_timeout);
        for client in clients {
            dispatcher.register_client(client);
        }
        FallbackCoordinator::new(
            IntentResolver::new(script, registry, &config),
            dispatcher,
            RetryPolicy::immediate(3),
        )
    }

    #[tokio::test]
    async fn transient_read_failure_is_retried_to_success() {
        let calendar = Arc::new(RecordingClient::new("calendar"));
        calendar.fail_next(ServiceError::Transient("timed out".into()));
        let coordinator = coordinator(
            ScriptedInference::replies(vec![intent_json(
                "calendar",
                "list_items",
                json!({"max_results": 5}),
                0.9,
            )]),
            vec![calendar.clone()],
        );
        let store = ContextStore::new(10, None);
        let mut session = store.get_or_create("s").await.unwrap();

        let outcome = coordinator.run(&mut session, "list my events").await;
        assert!(matches!(outcome, PipelineOutcome::Completed { .. }));
        assert_eq!(calendar.call_count(), 2);
        assert_eq!(session.dispatch_attempts(), 2);
        assert_eq!(
            session.latest_turn().unwrap().outcome,
            TurnOutcome::DispatchSucceeded { attempt: 2 }
        );
    }

    #[tokio::test]
    async fn non_idempotent_mutation_gets_exactly_one_attempt() {
        let docs = Arc::new(RecordingClient::new("document"));
        docs.fail_next(ServiceError::Transient("503".into()));
        let coordinator = coordinator(
            ScriptedInference::replies(vec![intent_json(
                "document",
                "create_item",
                json!({"title": "Q1 Plan"}),
                0.9,
            )]),
            vec![docs.clone()],
        );
        let store = ContextStore::new(10, None);
        let mut session = store.get_or_create("s").await.unwrap();

        let outcome = coordinator.run(&mut session, "create Q1 Plan").await;
        match outcome {
            PipelineOutcome::Failed { error, .. } => {
                assert_eq!(error.kind(), "transient_external_error")
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(docs.call_count(), 1);
        assert_eq!(session.dispatch_attempts(), 1);
    }

    #[tokio::test]
    async fn idempotent_mutation_is_retried() {
        let sheets = Arc::new(
            RecordingClient::new("spreadsheet")
                .idempotent(Operation::Extension("write_values".into())),
        );
        sheets.fail_next(ServiceError::Transient("503".into()));
        let coordinator = coordinator(
            ScriptedInference::replies(vec![intent_json(
                "spreadsheet",
                "write_values",
                json!({"id": "sheet-1", "range": "A1", "values": [[1, 2]]}),
                0.9,
            )]),
            vec![sheets.clone()],
        );
        let store = ContextStore::new(10, None);
        let mut session = store.get_or_create("s").await.unwrap();

        let outcome = coordinator.run(&mut session, "write 1 and 2").await;
        assert!(matches!(outcome, PipelineOutcome::Completed { .. }));
        assert_eq!(sheets.call_count(), 2);
    }

    #[tokio::test]
    async fn clarification_never_dispatches() {
        let mail = Arc::new(RecordingClient::new("mail"));
        let coordinator = coordinator(
            ScriptedInference::replies(vec![r#"{"clarification": "Who should I email?"}"#.into()]),
            vec![mail.clone()],
        );
        let store = ContextStore::new(10, None);
        let mut session = store.get_or_create("s").await.unwrap();

        let outcome = coordinator.run(&mut session, "send an email").await;
        assert!(matches!(outcome, PipelineOutcome::Clarification(_)));
        assert_eq!(mail.call_count(), 0);
        assert_eq!(
            session.latest_turn().unwrap().outcome,
            TurnOutcome::ClarificationRequested
        );
    }

    #[tokio::test]
    async fn exhausted_retries_surface_terminal_failure() {
        let calendar = Arc::new(RecordingClient::new("calendar"));
        for _ in 0..3 {
            calendar.fail_next(ServiceError::Transient("timed out".into()));
        }
        let coordinator = coordinator(
            ScriptedInference::replies(vec![intent_json("calendar", "list_items", json!({}), 0.9)]),
            vec![calendar.clone()],
        );
        let store = ContextStore::new(10, None);
        let mut session = store.get_or_create("s").await.unwrap();

        match coordinator.run(&mut session, "list events").await {
            PipelineOutcome::Failed {
                error: RouterError::RetriesExhausted { attempts, .. },
                ..
            } => assert_eq!(attempts, 3),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(calendar.call_count(), 3);
        assert_eq!(session.dispatch_attempts(), 3);
    }

    #[tokio::test]
    async fn inference_is_retried_with_a_fresh_call() {
        let calendar = Arc::new(RecordingClient::new("calendar"));
        let coordinator = coordinator(
            ScriptedInference::new(vec![
                Err(crate::core::errors::ExternalError::transient("inference", "429")),
                Ok(intent_json("calendar", "list_items", json!({}), 0.9)),
            ]),
            vec![calendar.clone()],
        );
        let store = ContextStore::new(10, None);
        let mut session = store.get_or_create("s").await.unwrap();

        let outcome = coordinator.run(&mut session, "list events").await;
        assert!(matches!(outcome, PipelineOutcome::Completed { .. }));
        assert_eq!(calendar.call_count(), 1);
    }
}
