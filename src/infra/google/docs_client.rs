// =============================================================================
// GOOGLE DOCS CLIENT
// =============================================================================
//
// Docs v1: the document capability.
//
// - `get_item` returns the document text, tables flattened to pipe rows
// - `create_item` creates the document, then inserts the initial content
// - `append_text` inserts before the final newline of the body
// - Listing, deletion and renaming go through Drive

use super::drive_client::{delete_file, drive_query, list_files, rename_file};
use super::google_api::{item_url, GoogleApi};
use crate::core::dispatch::{Parameters, ServiceError, WorkspaceClient};
use crate::core::registry::workspace_catalog::{DOCUMENT, GOOGLE_DOC_MIME};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

const DOCUMENTS_URL: &str = "https://docs.googleapis.com/v1/documents";

// =============================================================================
// GOOGLE DOCS API RESPONSE STRUCTURES
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    document_id: String,
    #[serde(default)]
    title: String,
    body: Option<Body>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Body {
    #[serde(default)]
    content: Vec<StructuralElement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructuralElement {
    end_index: Option<i64>,
    paragraph: Option<Paragraph>,
    table: Option<Table>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paragraph {
    #[serde(default)]
    elements: Vec<ParagraphElement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParagraphElement {
    text_run: Option<TextRun>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextRun {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Table {
    #[serde(default)]
    table_rows: Vec<TableRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableRow {
    #[serde(default)]
    table_cells: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableCell {
    #[serde(default)]
    content: Vec<StructuralElement>,
}

impl Document {
    fn text(&self) -> String {
        let mut output = String::new();
        if let Some(body) = &self.body {
            for element in &body.content {
                extract_element_text(element, &mut output);
            }
        }
        output
    }

    /// Index just before the body's trailing newline, where appended text goes.
    fn append_index(&self) -> i64 {
        self.body
            .as_ref()
            .and_then(|b| b.content.last())
            .and_then(|e| e.end_index)
            .map(|end| (end - 1).max(1))
            .unwrap_or(1)
    }
}

fn extract_element_text(element: &StructuralElement, output: &mut String) {
    if let Some(paragraph) = &element.paragraph {
        for para_element in &paragraph.elements {
            if let Some(content) = para_element.text_run.as_ref().and_then(|r| r.content.as_ref()) {
                output.push_str(content);
            }
        }
    }

    if let Some(table) = &element.table {
        for row in &table.table_rows {
            let cells: Vec<String> = row
                .table_cells
                .iter()
                .map(|cell| {
                    let mut cell_text = String::new();
                    for cell_element in &cell.content {
                        extract_element_text(cell_element, &mut cell_text);
                    }
                    cell_text.trim().to_string()
                })
                .collect();
            output.push_str(&format!("| {} |\n", cells.join(" | ")));
        }
    }
}

fn insert_text_request(index: i64, text: &str) -> Value {
    json!({
        "requests": [{
            "insertText": { "location": { "index": index }, "text": text }
        }]
    })
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct DocsClient {
    api: GoogleApi,
}

impl DocsClient {
    pub fn new(api: GoogleApi) -> Self {
        Self { api }
    }

    async fn fetch(&self, id: &str) -> Result<Document, ServiceError> {
        let raw = self
            .api
            .get(&item_url(DOCUMENTS_URL, id)?, &[])
            .await?;
        serde_json::from_value(raw)
            .map_err(|e| ServiceError::Permanent(format!("unreadable document {}: {}", id, e)))
    }

    async fn batch_update(&self, id: &str, requests: &Value) -> Result<Value, ServiceError> {
        self.api
            .post(&format!("{}:batchUpdate", item_url(DOCUMENTS_URL, id)?), requests)
            .await
    }

    async fn append_text(&self, params: &Parameters) -> Result<Value, ServiceError> {
        let id = params
            .text("id")
            .ok_or_else(|| ServiceError::Permanent("missing document id".to_string()))?;
        let text = params.text("text").unwrap_or_default();

        let document = self.fetch(id).await?;
        self.batch_update(id, &insert_text_request(document.append_index(), text))
            .await?;

        tracing::debug!(document = %id, chars = text.len(), "Appended text");
        Ok(json!({ "id": id, "title": document.title, "appended": text.len() }))
    }
}

#[async_trait]
impl WorkspaceClient for DocsClient {
    fn capability(&self) -> &str {
        DOCUMENT
    }

    async fn list_items(&self, _filter: &Parameters, max_results: u32) -> Result<Value, ServiceError> {
        list_files(
            &self.api,
            drive_query(Some(GOOGLE_DOC_MIME), None),
            max_results,
            "modifiedTime desc",
        )
        .await
    }

    async fn get_item(&self, id: &str) -> Result<Value, ServiceError> {
        let document = self.fetch(id).await?;
        Ok(json!({
            "id": document.document_id,
            "title": document.title,
            "text": document.text(),
        }))
    }

    async fn create_item(&self, fields: &Parameters) -> Result<Value, ServiceError> {
        let title = fields
            .text("title")
            .ok_or_else(|| ServiceError::Permanent("a document needs a title".to_string()))?;
        let created: Document = serde_json::from_value(
            self.api
                .post(DOCUMENTS_URL, &json!({ "title": title }))
                .await?,
        )
        .map_err(|e| ServiceError::Permanent(format!("unreadable document: {}", e)))?;

        if let Some(content) = fields.text("content").filter(|c| !c.is_empty()) {
            self.batch_update(&created.document_id, &insert_text_request(1, content))
                .await?;
        }

        Ok(json!({ "id": created.document_id, "title": created.title }))
    }

    /// `fields.requests` goes to batchUpdate as-is; `fields.title` renames
    /// the file through Drive.
    async fn update_item(&self, id: &str, fields: &Parameters) -> Result<Value, ServiceError> {
        let changes = fields
            .object("fields")
            .ok_or_else(|| ServiceError::Permanent("nothing to update".to_string()))?;

        let requests = changes.get("requests").filter(|r| r.is_array());
        let title = changes.get("title").and_then(Value::as_str);
        if requests.is_none() && title.is_none() {
            return Err(ServiceError::Permanent(
                "document updates need 'requests' or 'title'".to_string(),
            ));
        }

        if let Some(requests) = requests {
            self.batch_update(id, &json!({ "requests": requests }))
                .await?;
        }
        if let Some(title) = title {
            rename_file(&self.api, id, title).await?;
        }
        Ok(json!({ "id": id, "title": title }))
    }

    async fn delete_item(&self, id: &str) -> Result<Value, ServiceError> {
        delete_file(&self.api, id).await
    }

    async fn invoke_extension(&self, operation: &str, params: &Parameters) -> Result<Value, ServiceError> {
        match operation {
            "append_text" => self.append_text(params).await,
            other => Err(ServiceError::Unsupported(other.to_string())),
        }
    }
}
