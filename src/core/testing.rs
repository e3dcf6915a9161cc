// Deterministic stand-ins for the model and the workspace services.

use crate::core::ai::{InferenceContext, InferenceProvider};
use crate::core::dispatch::{Parameters, ServiceError, WorkspaceClient};
use crate::core::errors::ExternalError;
use crate::core::intent::Intent;
use crate::core::registry::Operation;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Builds an already-validated intent for tests.
pub fn intent(capability: &str, operation: &str, params: Value) -> Intent {
    Intent::new(
        capability,
        Operation::parse(operation),
        params.as_object().cloned().unwrap_or_default(),
        0.9,
    )
    .unwrap()
}

/// What a well-behaved model would answer.
pub fn intent_json(capability: &str, operation: &str, params: Value, confidence: f64) -> String {
    json!({
        "capability": capability,
        "operation": operation,
        "parameters": params,
        "confidence": confidence,
    })
    .to_string()
}

// ============================================================================
// SCRIPTED INFERENCE
// ============================================================================

/// Answers `infer` calls from a fixed script, in order.
pub struct ScriptedInference {
    responses: Mutex<VecDeque<Result<String, ExternalError>>>,
    prompts: Mutex<Vec<String>>,
    contexts: Mutex<Vec<InferenceContext>>,
    delay: Option<Duration>,
}

impl ScriptedInference {
    pub fn new(responses: Vec<Result<String, ExternalError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn replies(replies: Vec<String>) -> Self {
        Self::new(replies.into_iter().map(Ok).collect())
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn last_context(&self) -> Option<InferenceContext> {
        self.contexts.lock().unwrap().last().cloned()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl InferenceProvider for ScriptedInference {
    async fn infer(&self, prompt: &str, context: &InferenceContext) -> Result<String, ExternalError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.contexts.lock().unwrap().push(context.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ExternalError::permanent("inference", "script exhausted")))
    }
}

// ============================================================================
// RECORDING CLIENT
// ============================================================================

/// In-memory workspace capability that records every call.
pub struct RecordingClient {
    capability: String,
    items: Mutex<Vec<Map<String, Value>>>,
    next_id: Mutex<u32>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<ServiceError>>,
    unsupported: HashSet<String>,
    idempotent: HashSet<Operation>,
    delay: Option<Duration>,
}

impl RecordingClient {
    pub fn new(capability: &str) -> Self {
        Self {
            capability: capability.to_string(),
            items: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            unsupported: HashSet::new(),
            idempotent: HashSet::new(),
            delay: None,
        }
    }

    pub fn without_support_for(mut self, operation: &str) -> Self {
        self.unsupported.insert(operation.to_string());
        self
    }

    pub fn idempotent(mut self, operation: Operation) -> Self {
        self.idempotent.insert(operation);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Seeds an item directly into the backing store.
    pub fn seed(&self, fields: Value) -> String {
        let id = self.allocate_id();
        let mut item = fields.as_object().cloned().unwrap_or_default();
        item.insert("id".to_string(), Value::String(id.clone()));
        self.items.lock().unwrap().push(item);
        id
    }

    /// The next call fails with `error`. Queued failures are used up in order.
    pub fn fail_next(&self, error: ServiceError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn item(&self, id: &str) -> Option<Map<String, Value>> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .find(|item| item.get("id").and_then(Value::as_str) == Some(id))
            .cloned()
    }

    fn allocate_id(&self) -> String {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        format!("{}-{}", self.capability, *next)
    }

    async fn enter(&self, operation: &str) -> Result<(), ServiceError> {
        self.calls.lock().unwrap().push(operation.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unsupported.contains(operation) {
            return Err(ServiceError::Unsupported(operation.to_string()));
        }
        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn not_found(&self, id: &str) -> ServiceError {
        ServiceError::Permanent(format!("404 {} item {} not found", self.capability, id))
    }
}

#[async_trait]
impl WorkspaceClient for RecordingClient {
    fn capability(&self) -> &str {
        &self.capability
    }

    async fn list_items(&self, _filter: &Parameters, max_results: u32) -> Result<Value, ServiceError> {
        self.enter("list_items").await?;
        let items: Vec<Value> = self
            .items
            .lock()
            .unwrap()
            .iter()
            .take(max_results as usize)
            .cloned()
            .map(Value::Object)
            .collect();
        Ok(json!({ "items": items }))
    }

    async fn get_item(&self, id: &str) -> Result<Value, ServiceError> {
        self.enter("get_item").await?;
        self.item(id)
            .map(Value::Object)
            .ok_or_else(|| self.not_found(id))
    }

    async fn create_item(&self, fields: &Parameters) -> Result<Value, ServiceError> {
        self.enter("create_item").await?;
        let id = self.allocate_id();
        let mut item = match fields.to_json() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        item.insert("id".to_string(), Value::String(id));
        self.items.lock().unwrap().push(item.clone());
        Ok(Value::Object(item))
    }

    async fn update_item(&self, id: &str, fields: &Parameters) -> Result<Value, ServiceError> {
        self.enter("update_item").await?;
        let mut items = self.items.lock().unwrap();
        let item = items
            .iter_mut()
            .find(|item| item.get("id").and_then(Value::as_str) == Some(id))
            .ok_or_else(|| self.not_found(id))?;
        if let Some(changes) = fields.object("fields") {
            for (key, value) in changes {
                item.insert(key.clone(), value.clone());
            }
        }
        Ok(Value::Object(item.clone()))
    }

    async fn delete_item(&self, id: &str) -> Result<Value, ServiceError> {
        self.enter("delete_item").await?;
        let mut items = self.items.lock().unwrap();
        let before = items.len();
        items.retain(|item| item.get("id").and_then(Value::as_str) != Some(id));
        if items.len() == before {
            return Err(self.not_found(id));
        }
        Ok(json!({ "id": id, "deleted": true }))
    }

    async fn invoke_extension(&self, operation: &str, params: &Parameters) -> Result<Value, ServiceError> {
        self.enter(operation).await?;
        let id = params.text("id").unwrap_or_default().to_string();
        Ok(json!({ "id": id, "operation": operation, "params": params.to_json() }))
    }

    fn is_idempotent(&self, operation: &Operation) -> bool {
        self.idempotent.contains(operation)
    }
}
