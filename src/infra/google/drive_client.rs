// Drive v3 files: the storage capability, plus listing and deletion for the
// spreadsheet and document capabilities, which Drive owns.

use super::google_api::{item_url, GoogleApi};
use crate::core::dispatch::{Parameters, ServiceError, WorkspaceClient};
use crate::core::registry::workspace_catalog::{GOOGLE_DOC_MIME, STORAGE};
use crate::core::registry::Operation;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const LIST_FIELDS: &str = "files(id,name,mimeType,modifiedTime,webViewLink)";
const ITEM_FIELDS: &str = "id,name,mimeType,modifiedTime,size,webViewLink,parents";

/// Builds the `q` filter: never trashed, optionally one MIME type, plus the
/// caller's own query.
pub fn drive_query(mime_type: Option<&str>, user_query: Option<&str>) -> String {
    let mut clauses = vec!["trashed = false".to_string()];
    if let Some(mime) = mime_type {
        clauses.push(format!("mimeType = '{}'", mime.replace('\'', "\\'")));
    }
    if let Some(query) = user_query.map(str::trim).filter(|q| !q.is_empty()) {
        clauses.push(format!("({})", query));
    }
    clauses.join(" and ")
}

pub async fn list_files(
    api: &GoogleApi,
    query: String,
    max_results: u32,
    order_by: &str,
) -> Result<Value, ServiceError> {
    let response = api
        .get(
            FILES_URL,
            &[
                ("q", query),
                ("pageSize", max_results.clamp(1, 1000).to_string()),
                ("orderBy", order_by.to_string()),
                ("fields", LIST_FIELDS.to_string()),
            ],
        )
        .await?;

    let items = response
        .get("files")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    Ok(json!({ "items": items }))
}

pub async fn delete_file(api: &GoogleApi, id: &str) -> Result<Value, ServiceError> {
    api.delete(&item_url(FILES_URL, id)?).await?;
    Ok(json!({ "id": id, "deleted": true }))
}

pub async fn rename_file(api: &GoogleApi, id: &str, name: &str) -> Result<Value, ServiceError> {
    api.patch(
        &format!("{}?fields={}", item_url(FILES_URL, id)?, ITEM_FIELDS),
        &json!({ "name": name }),
    )
    .await
}

pub struct DriveClient {
    api: GoogleApi,
}

impl DriveClient {
    pub fn new(api: GoogleApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl WorkspaceClient for DriveClient {
    fn capability(&self) -> &str {
        STORAGE
    }

    async fn list_items(&self, filter: &Parameters, max_results: u32) -> Result<Value, ServiceError> {
        let order_by = filter.text("order_by").unwrap_or("modifiedTime desc");
        list_files(
            &self.api,
            drive_query(None, filter.text("query")),
            max_results,
            order_by,
        )
        .await
    }

    async fn get_item(&self, id: &str) -> Result<Value, ServiceError> {
        self.api
            .get(
                &item_url(FILES_URL, id)?,
                &[("fields", ITEM_FIELDS.to_string())],
            )
            .await
    }

    async fn create_item(&self, fields: &Parameters) -> Result<Value, ServiceError> {
        let name = fields
            .text("name")
            .ok_or_else(|| ServiceError::Permanent("a file needs a name".to_string()))?;
        let mut body = Map::new();
        body.insert("name".to_string(), json!(name));
        body.insert(
            "mimeType".to_string(),
            json!(fields.text("mime_type").unwrap_or(GOOGLE_DOC_MIME)),
        );
        if let Some(parent) = fields.text("parent_id") {
            body.insert("parents".to_string(), json!([parent]));
        }

        self.api
            .post(
                &format!("{}?fields={}", FILES_URL, ITEM_FIELDS),
                &Value::Object(body),
            )
            .await
    }

    async fn update_item(&self, id: &str, fields: &Parameters) -> Result<Value, ServiceError> {
        let changes = fields
            .object("fields")
            .cloned()
            .ok_or_else(|| ServiceError::Permanent("nothing to update".to_string()))?;
        self.api
            .patch(
                &format!("{}?fields={}", item_url(FILES_URL, id)?, ITEM_FIELDS),
                &Value::Object(changes),
            )
            .await
    }

    async fn delete_item(&self, id: &str) -> Result<Value, ServiceError> {
        delete_file(&self.api, id).await
    }

    fn is_idempotent(&self, operation: &Operation) -> bool {
        operation == &Operation::UpdateItem
    }
}
