// Thin authenticated JSON transport shared by the Google service clients.

use super::auth::AccessTokenSource;
use crate::core::dispatch::ServiceError;
use crate::core::errors::ExternalError;
use crate::infra::http::{is_transient_status, is_transient_transport};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct GoogleApi {
    client: Client,
    auth: Arc<dyn AccessTokenSource>,
}

impl GoogleApi {
    pub fn new(auth: Arc<dyn AccessTokenSource>) -> Self {
        Self {
            client: Client::new(),
            auth,
        }
    }

    pub async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Value, ServiceError> {
        self.send(Method::GET, url, query, None).await
    }

    pub async fn post(&self, url: &str, body: &Value) -> Result<Value, ServiceError> {
        self.send(Method::POST, url, &[], Some(body)).await
    }

    pub async fn put(
        &self,
        url: &str,
        query: &[(&str, String)],
        body: &Value,
    ) -> Result<Value, ServiceError> {
        self.send(Method::PUT, url, query, Some(body)).await
    }

    pub async fn patch(&self, url: &str, body: &Value) -> Result<Value, ServiceError> {
        self.send(Method::PATCH, url, &[], Some(body)).await
    }

    pub async fn delete(&self, url: &str) -> Result<(), ServiceError> {
        self.send(Method::DELETE, url, &[], None).await.map(|_| ())
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ServiceError> {
        let token = self.auth.access_token().await.map_err(from_external)?;

        let mut request: RequestBuilder = self
            .client
            .request(method.clone(), url)
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!(%method, url, "Google API request");

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            let detail = format!("{} {}", status, error_message(&text));
            return Err(if is_transient_status(status) {
                ServiceError::Transient(detail)
            } else {
                ServiceError::Permanent(detail)
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ServiceError::Permanent(format!("unreadable response: {}", e)))
    }
}

/// Appends `segment` to `base` as one percent-encoded path segment.
/// Sheets ranges like `Sheet 1!A1:B2` need this.
pub fn with_segment(base: &str, segment: &str) -> Result<String, ServiceError> {
    let mut url = Url::parse(base).map_err(|e| ServiceError::Permanent(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| ServiceError::Permanent(format!("{} cannot take path segments", base)))?
        .push(segment);
    Ok(url.to_string())
}

/// `base/<id>` for an item id that came from model output.
///
/// The id is always one encoded segment, so `/`, `?` or `#` inside it cannot
/// reach a different resource.
pub fn item_url(base: &str, id: &str) -> Result<String, ServiceError> {
    let id = id.trim();
    if id.is_empty() || id == "." || id == ".." {
        return Err(ServiceError::Permanent(format!("'{}' is not a valid item id", id)));
    }
    with_segment(base, id)
}

/// Pulls `error.message` out of a Google error body, or returns it raw.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(300).collect())
}

fn transport_error(error: reqwest::Error) -> ServiceError {
    if is_transient_transport(&error) {
        ServiceError::Transient(error.to_string())
    } else {
        ServiceError::Permanent(error.to_string())
    }
}

fn from_external(error: ExternalError) -> ServiceError {
    if error.is_transient() {
        ServiceError::Transient(error.detail)
    } else {
        ServiceError::Permanent(error.detail)
    }
}
