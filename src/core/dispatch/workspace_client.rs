use super::coercion::Parameters;
use crate::core::registry::Operation;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Failure reported by a service client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Network trouble, timeouts, rate limits, 5xx.
    #[error("Transient service error: {0}")]
    Transient(String),

    /// Auth failures, not found, bad request, quota.
    #[error("Service error: {0}")]
    Permanent(String),

    /// The capability does not implement this operation.
    #[error("Operation '{0}' is not supported")]
    Unsupported(String),
}

/// The uniform surface every workspace capability exposes.
///
/// Each capability implements the subset it supports; everything else falls
/// through to `Unsupported`, which the dispatcher reports as an unknown
/// operation instead of failing hard.
#[async_trait]
pub trait WorkspaceClient: Send + Sync {
    /// Registry name of the capability this client serves.
    fn capability(&self) -> &str;

    async fn list_items(&self, _filter: &Parameters, _max_results: u32) -> Result<Value, ServiceError> {
        Err(ServiceError::Unsupported("list_items".to_string()))
    }

    async fn get_item(&self, _id: &str) -> Result<Value, ServiceError> {
        Err(ServiceError::Unsupported("get_item".to_string()))
    }

    async fn create_item(&self, _fields: &Parameters) -> Result<Value, ServiceError> {
        Err(ServiceError::Unsupported("create_item".to_string()))
    }

    async fn update_item(&self, _id: &str, _fields: &Parameters) -> Result<Value, ServiceError> {
        Err(ServiceError::Unsupported("update_item".to_string()))
    }

    async fn delete_item(&self, _id: &str) -> Result<Value, ServiceError> {
        Err(ServiceError::Unsupported("delete_item".to_string()))
    }

    /// Capability-specific operations such as `append_text`.
    async fn invoke_extension(
        &self,
        operation: &str,
        _params: &Parameters,
    ) -> Result<Value, ServiceError> {
        Err(ServiceError::Unsupported(operation.to_string()))
    }

    /// Whether repeating a mutating call leaves the same end state.
    /// Reads are always safe to repeat and are not asked about.
    fn is_idempotent(&self, _operation: &Operation) -> bool {
        false
    }
}
