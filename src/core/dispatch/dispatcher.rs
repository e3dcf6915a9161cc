// Turns a resolved intent into a service call.
//
// Every attempt ends up in the session history, whether it succeeded, failed
// at the service, or never left the building because a parameter was bad.

use super::coercion::{coerce_parameters, Parameters};
use super::workspace_client::{ServiceError, WorkspaceClient};
use crate::core::context::{ConversationTurn, SessionHandle};
use crate::core::errors::{CoercionError, ExternalError, RegistryError, RouterError};
use crate::core::intent::Intent;
use crate::core::registry::{CapabilityRegistry, Operation};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_RESULTS: u32 = 10;

/// Terminal value of one dispatch attempt. Retries make new ones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    pub payload: Option<Value>,
    pub error: Option<ExternalError>,
    pub summary: String,
}

impl DispatchResult {
    fn ok(payload: Value, summary: String) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
            summary,
        }
    }

    fn failed(error: ExternalError) -> Self {
        let summary = error.to_string();
        Self {
            success: false,
            payload: None,
            error: Some(error),
            summary,
        }
    }
}

pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    clients: HashMap<String, Arc<dyn WorkspaceClient>>,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>, call_timeout: Duration) -> Self {
        Self {
            registry,
            clients: HashMap::new(),
            call_timeout,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn WorkspaceClient>) -> Self {
        self.register_client(client);
        self
    }

    pub fn register_client(&mut self, client: Arc<dyn WorkspaceClient>) {
        let name = client.capability().to_string();
        if self.registry.capability(&name).is_none() {
            tracing::warn!(capability = %name, "Client registered for a capability the registry does not know");
        }
        self.clients.insert(name, client);
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Whether a failed attempt at `intent` may be repeated.
    ///
    /// Reads always may. Mutating operations only when the client says the
    /// operation is idempotent.
    pub fn is_retry_safe(&self, intent: &Intent) -> bool {
        let Ok(descriptor) = self
            .registry
            .resolve(intent.capability(), intent.operation().as_str())
        else {
            return false;
        };
        if !descriptor.mutating {
            return true;
        }
        self.clients
            .get(intent.capability())
            .map(|client| client.is_idempotent(intent.operation()))
            .unwrap_or(false)
    }

    /// Validates, coerces and executes one attempt, recording it as a turn.
    ///
    /// Service failures come back as `Ok(DispatchResult { success: false, .. })`.
    /// `Err` means nothing was sent: the intent was rejected up front.
    pub async fn dispatch(
        &self,
        session: &mut SessionHandle,
        request_text: &str,
        intent: &Intent,
        attempt: u32,
    ) -> Result<DispatchResult, RouterError> {
        let (client, params) = match self.prepare(intent) {
            Ok(prepared) => prepared,
            Err(err) => {
                tracing::warn!(
                    session_id = %session.id,
                    intent = %intent.label(),
                    error_kind = err.kind(),
                    "Rejected intent before dispatch: {}",
                    err
                );
                session
                    .append(ConversationTurn::rejected(request_text, intent, &err))
                    .await;
                return Err(err);
            }
        };

        tracing::info!(
            session_id = %session.id,
            intent = %intent.label(),
            attempt,
            "Dispatching"
        );

        let outcome = tokio::time::timeout(self.call_timeout, self.invoke(client, intent, &params))
            .await
            .unwrap_or_else(|_| {
                Err(ServiceError::Transient(format!(
                    "timed out after {}s",
                    self.call_timeout.as_secs_f32()
                )))
            });

        match outcome {
            Ok(payload) => {
                let summary = summarize(intent, &params, &payload);
                self.remember_entities(session, intent, &params, &payload)
                    .await;
                session
                    .append(ConversationTurn::succeeded(
                        request_text,
                        intent,
                        summary.clone(),
                        attempt,
                    ))
                    .await;
                tracing::info!(session_id = %session.id, intent = %intent.label(), attempt, "Dispatch succeeded");
                Ok(DispatchResult::ok(payload, summary))
            }
            Err(ServiceError::Unsupported(operation)) => {
                let err = RouterError::Registry(RegistryError::UnknownOperation {
                    capability: intent.capability().to_string(),
                    operation,
                });
                session
                    .append(ConversationTurn::rejected(request_text, intent, &err))
                    .await;
                Err(err)
            }
            Err(service_err) => {
                let external = match service_err {
                    ServiceError::Transient(detail) => {
                        ExternalError::transient(intent.capability(), detail)
                    }
                    other => ExternalError::permanent(intent.capability(), other.to_string()),
                };
                tracing::warn!(
                    session_id = %session.id,
                    intent = %intent.label(),
                    attempt,
                    kind = %external.kind,
                    "Dispatch failed: {}",
                    external.detail
                );
                let err = RouterError::External(external.clone());
                session
                    .append(ConversationTurn::dispatch_failed(
                        request_text,
                        intent,
                        &err,
                        attempt,
                    ))
                    .await;
                Ok(DispatchResult::failed(external))
            }
        }
    }

    fn prepare(&self, intent: &Intent) -> Result<(&dyn WorkspaceClient, Parameters), RouterError> {
        let descriptor = self
            .registry
            .resolve(intent.capability(), intent.operation().as_str())?;
        let client = self
            .clients
            .get(intent.capability())
            .ok_or_else(|| RegistryError::UnknownCapability(intent.capability().to_string()))?;
        let params = coerce_parameters(intent, descriptor)?;
        Ok((client.as_ref(), params))
    }

    async fn invoke(
        &self,
        client: &dyn WorkspaceClient,
        intent: &Intent,
        params: &Parameters,
    ) -> Result<Value, ServiceError> {
        match intent.operation() {
            Operation::ListItems => {
                let max_results = params.count("max_results").unwrap_or(DEFAULT_MAX_RESULTS);
                client.list_items(params, max_results).await
            }
            Operation::GetItem => client.get_item(require_id(params)?).await,
            Operation::CreateItem => client.create_item(params).await,
            Operation::UpdateItem => client.update_item(require_id(params)?, params).await,
            Operation::DeleteItem => client.delete_item(require_id(params)?).await,
            Operation::Extension(name) => client.invoke_extension(name, params).await,
        }
    }

    async fn remember_entities(
        &self,
        session: &mut SessionHandle,
        intent: &Intent,
        params: &Parameters,
        payload: &Value,
    ) {
        let capability = intent.capability();

        if !matches!(intent.operation(), Operation::ListItems | Operation::DeleteItem) {
            if let Some(id) = item_id(params, payload) {
                session
                    .remember(&format!("{}.last_id", capability), &id)
                    .await;
            }
            if let Some(title) = item_title(params, payload) {
                session
                    .remember(&format!("{}.last_title", capability), &title)
                    .await;
            }
        }

        if capability == "mail" && intent.operation() == &Operation::CreateItem {
            if let Some(to) = params.text("to") {
                session.remember("mail.last_recipient", to).await;
            }
        }

        session.remember("last_capability", capability).await;
    }
}

fn require_id(params: &Parameters) -> Result<&str, ServiceError> {
    params.text("id").ok_or_else(|| {
        ServiceError::Permanent(
            CoercionError {
                parameter: "id".to_string(),
                expected: "text".to_string(),
                reason: "required parameter is missing".to_string(),
            }
            .to_string(),
        )
    })
}

/// The item id a call produced or touched.
fn item_id(params: &Parameters, payload: &Value) -> Option<String> {
    ["id", "documentId", "spreadsheetId", "messageId"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .or_else(|| params.text("id"))
        .map(str::to_string)
}

fn item_title(params: &Parameters, payload: &Value) -> Option<String> {
    let from_payload = ["title", "name", "summary", "subject"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .or_else(|| {
            payload
                .get("properties")
                .and_then(|p| p.get("title"))
                .and_then(Value::as_str)
        });
    from_payload
        .or_else(|| {
            ["title", "name", "summary", "subject"]
                .iter()
                .find_map(|key| params.text(key))
        })
        .map(str::to_string)
}

/// One line describing what happened, naming the item where there is one.
pub fn summarize(intent: &Intent, params: &Parameters, payload: &Value) -> String {
    let capability = intent.capability();
    let id = item_id(params, payload);
    let title = item_title(params, payload);
    let named = match (&title, &id) {
        (Some(title), Some(id)) => format!("{} '{}' (id {})", capability, title, id),
        (None, Some(id)) => format!("{} item {}", capability, id),
        (Some(title), None) => format!("{} '{}'", capability, title),
        (None, None) => format!("{} item", capability),
    };

    match intent.operation() {
        Operation::ListItems => {
            let count = payload
                .get("items")
                .and_then(Value::as_array)
                .or_else(|| payload.as_array())
                .map(Vec::len)
                .unwrap_or(0);
            format!("Found {} {} item{}", count, capability, if count == 1 { "" } else { "s" })
        }
        Operation::GetItem => format!("Fetched {}", named),
        Operation::CreateItem => format!("Created {}", named),
        Operation::UpdateItem => format!("Updated {}", named),
        Operation::DeleteItem => format!("Deleted {}", named),
        Operation::Extension(name) => format!("Ran {} on {}", name.replace('_', " "), named),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::{ContextStore, TurnOutcome};
    use crate::core::registry::workspace_catalog;
    use crate::core::testing::{intent, RecordingClient};
    use serde_json::json;

    fn dispatcher(clients: Vec<Arc<RecordingClient>>) -> Dispatcher {
        let mut dispatcher =
            Dispatcher::new(Arc::new(workspace_catalog().unwrap()), Duration::from_millis(200));
        for client in clients {
            dispatcher.register_client(client);
        }
        dispatcher
    }

    #[tokio::test]
    async fn mail_create_round_trip_records_item_id() {
        let mail = Arc::new(RecordingClient::new("mail"));
        let dispatcher = dispatcher(vec![mail.clone()]);
        let store = ContextStore::new(10, None);
        let mut session = store.get_or_create("s").await.unwrap();

        let intent = intent(
            "mail",
            "create_item",
            json!({"to": "a@b.com", "subject": "Hi", "body": "Hello"}),
        );
        let result = dispatcher
            .dispatch(&mut session, "email a@b.com", &intent, 1)
            .await
            .unwrap();

        assert!(result.success);
        let id = result.payload.as_ref().unwrap()["id"].as_str().unwrap().to_string();
        let latest = session.latest_turn().unwrap();
        assert!(latest.result_summary.as_ref().unwrap().contains(&id));
        assert_eq!(latest.outcome, TurnOutcome::DispatchSucceeded { attempt: 1 });
        assert_eq!(session.recall("mail.last_recipient"), Some("a@b.com"));
        assert_eq!(session.recall("mail.last_id"), Some(id.as_str()));
        assert_eq!(session.recall("last_capability"), Some("mail"));
    }

    #[tokio::test]
    async fn coercion_failure_never_reaches_the_client() {
        let calendar = Arc::new(RecordingClient::new("calendar"));
        let dispatcher = dispatcher(vec![calendar.clone()]);
        let store = ContextStore::new(10, None);
        let mut session = store.get_or_create("s").await.unwrap();

        let intent = intent(
            "calendar",
            "create_item",
            json!({"summary": "Lunch", "start_time": "whenever"}),
        );
        let err = dispatcher
            .dispatch(&mut session, "lunch whenever", &intent, 1)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "parameter_coercion_error");
        assert_eq!(calendar.call_count(), 0);
        assert_eq!(session.latest_turn().unwrap().outcome, TurnOutcome::Rejected);
    }

    #[tokio::test]
    async fn bad_event_time_in_update_fields_never_reaches_the_client() {
        let calendar = Arc::new(RecordingClient::new("calendar"));
        let dispatcher = dispatcher(vec![calendar.clone()]);
        let store = ContextStore::new(10, None);
        let mut session = store.get_or_create("s").await.unwrap();

        let intent = intent(
            "calendar",
            "update_item",
            json!({"id": "evt-1", "fields": {"summary": "Lunch", "end_time": "after lunch"}}),
        );
        let err = dispatcher
            .dispatch(&mut session, "move lunch", &intent, 1)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "parameter_coercion_error");
        assert_eq!(calendar.call_count(), 0);
    }

    #[tokio::test]
    async fn service_failure_is_recorded_and_wrapped() {
        let drive = Arc::new(RecordingClient::new("storage"));
        drive.fail_next(ServiceError::Permanent("404 File not found".to_string()));
        let dispatcher = dispatcher(vec![drive.clone()]);
        let store = ContextStore::new(10, None);
        let mut session = store.get_or_create("s").await.unwrap();

        let intent = intent("storage", "get_item", json!({"id": "missing"}));
        let result = dispatcher
            .dispatch(&mut session, "open the file", &intent, 1)
            .await
            .unwrap();

        assert!(!result.success);
        assert!(!result.error.as_ref().unwrap().is_transient());
        let latest = session.latest_turn().unwrap();
        assert_eq!(latest.outcome, TurnOutcome::DispatchFailed { attempt: 1 });
        assert_eq!(
            latest.error.as_ref().unwrap().kind,
            "permanent_external_error"
        );
    }

    #[tokio::test]
    async fn unsupported_operation_is_unknown_operation() {
        let mail = Arc::new(RecordingClient::new("mail").without_support_for("delete_item"));
        let dispatcher = dispatcher(vec![mail.clone()]);
        let store = ContextStore::new(10, None);
        let mut session = store.get_or_create("s").await.unwrap();

        let intent = intent("mail", "delete_item", json!({"id": "m-1"}));
        let err = dispatcher
            .dispatch(&mut session, "delete it", &intent, 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_operation_error");
    }

    #[tokio::test]
    async fn slow_calls_time_out_as_transient() {
        let calendar = Arc::new(RecordingClient::new("calendar").with_delay(Duration::from_secs(5)));
        let dispatcher = dispatcher(vec![calendar.clone()]);
        let store = ContextStore::new(10, None);
        let mut session = store.get_or_create("s").await.unwrap();

        let intent = intent("calendar", "list_items", json!({"max_results": 5}));
        let result = dispatcher
            .dispatch(&mut session, "list events", &intent, 1)
            .await
            .unwrap();
        assert!(result.error.unwrap().is_transient());
    }

    #[tokio::test]
    async fn missing_client_is_unknown_capability() {
        let dispatcher = dispatcher(vec![]);
        let store = ContextStore::new(10, None);
        let mut session = store.get_or_create("s").await.unwrap();

        let intent = intent("document", "get_item", json!({"id": "d"}));
        let err = dispatcher
            .dispatch(&mut session, "open doc", &intent, 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_capability_error");
    }

    #[test]
    fn retry_safety_follows_mutating_flag_and_client() {
        let sheets = Arc::new(
            RecordingClient::new("spreadsheet")
                .idempotent(Operation::Extension("write_values".to_string())),
        );
        let docs = Arc::new(RecordingClient::new("document"));
        let dispatcher = dispatcher(vec![sheets, docs]);

        assert!(dispatcher.is_retry_safe(&intent("document", "list_items", json!({}))));
        assert!(dispatcher.is_retry_safe(&intent(
            "spreadsheet",
            "read_values",
            json!({"id": "s", "range": "A1"})
        )));
        assert!(dispatcher.is_retry_safe(&intent(
            "spreadsheet",
            "write_values",
            json!({"id": "s", "range": "A1", "values": [[1]]})
        )));
        assert!(!dispatcher.is_retry_safe(&intent(
            "document",
            "append_text",
            json!({"id": "d", "text": "x"})
        )));
    }

    #[test]
    fn summary_names_list_count() {
        let intent = intent("calendar", "list_items", json!({"max_results": 5}));
        let summary = summarize(
            &intent,
            &Parameters::new(),
            &json!({"items": [{"id": "1"}, {"id": "2"}]}),
        );
        assert_eq!(summary, "Found 2 calendar items");
    }
}
