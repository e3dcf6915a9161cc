// The single entry point external callers use.
//
// One call is one turn: lock the session, resolve, dispatch under the
// fallback policy, record, and answer in a uniform shape. Front-ends (the
// Discord adapter, tests) only ever talk to this service.

use crate::core::ai::InferenceProvider;
use crate::core::config::RouterConfig;
use crate::core::context::ContextStore;
use crate::core::dispatch::{Dispatcher, WorkspaceClient};
use crate::core::errors::{ContextError, RegistryError, RouterError};
use crate::core::fallback::{FallbackCoordinator, PipelineOutcome, RetryPolicy};
use crate::core::intent::IntentResolver;
use crate::core::registry::CapabilityRegistry;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

// ============================================================================
// RESPONSE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Completed,
    /// We need more from the user before doing anything.
    Clarification,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub success: bool,
    /// Human-readable, safe to show as is.
    pub message: String,
    /// The service's result, or the error kind on failure.
    pub data: Option<Value>,
    pub kind: ResponseKind,
}

impl Response {
    fn completed(message: String, data: Option<Value>) -> Self {
        Self {
            success: true,
            message,
            data,
            kind: ResponseKind::Completed,
        }
    }

    fn clarification(question: String) -> Self {
        Self {
            success: false,
            message: question,
            data: None,
            kind: ResponseKind::Clarification,
        }
    }

    fn failed(error: &RouterError) -> Self {
        Self {
            success: false,
            message: failure_message(error),
            data: Some(json!({ "error_kind": error.kind() })),
            kind: ResponseKind::Failed,
        }
    }

    pub fn is_clarification(&self) -> bool {
        self.kind == ResponseKind::Clarification
    }
}

/// Plain-language failure text that names the error kind and never
/// includes raw payloads.
fn failure_message(error: &RouterError) -> String {
    let explanation = match error {
        RouterError::RetriesExhausted { attempts, last } => format!(
            "The {} service kept failing, so I gave up after {} attempts.",
            last.source_name, attempts
        ),
        RouterError::External(e) if e.is_transient() => format!(
            "The {} service had a temporary problem and I didn't retry, to avoid doing it twice. Please check and try again.",
            e.source_name
        ),
        RouterError::External(e) => {
            format!("The {} service refused the request: {}", e.source_name, e.detail)
        }
        RouterError::ParameterCoercion(e) => format!(
            "I couldn't use the {} you gave me: {}.",
            e.parameter.replace('_', " "),
            e.reason
        ),
        RouterError::Registry(RegistryError::UnknownOperation {
            capability,
            operation,
        }) => format!(
            "{} can't {} yet.",
            capitalize(capability),
            operation.replace('_', " ")
        ),
        RouterError::Registry(RegistryError::UnknownCapability(name)) => {
            format!("I'm not connected to {} right now.", name)
        }
        RouterError::Context(_) => "I couldn't load this conversation.".to_string(),
        other => other.to_string(),
    };
    format!("Sorry, that didn't work ({}). {}", error.kind(), explanation)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct IntegrationService<P: InferenceProvider> {
    context: Arc<ContextStore>,
    coordinator: FallbackCoordinator<P>,
}

impl<P: InferenceProvider> IntegrationService<P> {
    pub fn new(context: Arc<ContextStore>, coordinator: FallbackCoordinator<P>) -> Self {
        Self {
            context,
            coordinator,
        }
    }

    /// Wires resolver, dispatcher and coordinator from one config.
    pub fn from_config(
        provider: P,
        registry: Arc<CapabilityRegistry>,
        clients: Vec<Arc<dyn WorkspaceClient>>,
        context: Arc<ContextStore>,
        config: &RouterConfig,
    ) -> Self {
        let mut dispatcher = Dispatcher::new(Arc::clone(&registry), config.call_timeout);
        for client in clients {
            dispatcher.register_client(client);
        }
        let resolver = IntentResolver::new(provider, registry, config);
        let coordinator =
            FallbackCoordinator::new(resolver, dispatcher, RetryPolicy::from_config(config));
        Self::new(context, coordinator)
    }

    pub fn context(&self) -> &ContextStore {
        &self.context
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        self.coordinator.dispatcher().registry()
    }

    pub async fn process_natural_language_request(&self, session_id: &str, text: &str) -> Response {
        let text = text.trim();
        if text.is_empty() {
            return Response::clarification("What would you like me to do?".to_string());
        }

        let mut session = match self.context.get_or_create(session_id).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(session_id, "Failed to open session: {}", e);
                return Response::failed(&RouterError::Context(e));
            }
        };

        tracing::info!(session_id, "Processing request");

        match self.coordinator.run(&mut session, text).await {
            PipelineOutcome::Completed { result, .. } => {
                Response::completed(result.summary, result.payload)
            }
            PipelineOutcome::Clarification(request) => Response::clarification(request.question),
            PipelineOutcome::Failed { error, .. } => Response::failed(&error),
        }
    }

    /// Forgets everything about a session.
    pub async fn reset_session(&self, session_id: &str) -> Result<(), ContextError> {
        self.context.clear(session_id).await
    }
}
