// Sheets v4: the spreadsheet capability. Listing and deletion go through
// Drive since the Sheets API has neither.

use super::drive_client::{delete_file, drive_query, list_files};
use super::google_api::{item_url, with_segment, GoogleApi};
use crate::core::dispatch::{Parameters, ServiceError, WorkspaceClient};
use crate::core::registry::workspace_catalog::{GOOGLE_SHEET_MIME, SPREADSHEET};
use crate::core::registry::Operation;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

const SPREADSHEETS_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

pub struct SheetsClient {
    api: GoogleApi,
}

impl SheetsClient {
    pub fn new(api: GoogleApi) -> Self {
        Self { api }
    }

    fn values_url(id: &str, range: &str) -> Result<String, ServiceError> {
        with_segment(&format!("{}/values", item_url(SPREADSHEETS_URL, id)?), range)
    }

    async fn read_values(&self, params: &Parameters) -> Result<Value, ServiceError> {
        let (id, range) = id_and_range(params)?;
        let values = self.api.get(&Self::values_url(id, range)?, &[]).await?;
        Ok(json!({
            "id": id,
            "range": values.get("range").and_then(Value::as_str).unwrap_or(range),
            "values": values.get("values").cloned().unwrap_or_else(|| json!([])),
        }))
    }

    async fn write_values(&self, params: &Parameters) -> Result<Value, ServiceError> {
        let (id, range) = id_and_range(params)?;
        let rows = params
            .table("values")
            .ok_or_else(|| ServiceError::Permanent("no values to write".to_string()))?;

        let body = json!({ "range": range, "majorDimension": "ROWS", "values": rows });
        let updated = self
            .api
            .put(
                &Self::values_url(id, range)?,
                &[("valueInputOption", "RAW".to_string())],
                &body,
            )
            .await?;
        Ok(json!({
            "id": id,
            "updatedRange": updated.get("updatedRange"),
            "updatedCells": updated.get("updatedCells"),
        }))
    }
}

#[async_trait]
impl WorkspaceClient for SheetsClient {
    fn capability(&self) -> &str {
        SPREADSHEET
    }

    async fn list_items(&self, _filter: &Parameters, max_results: u32) -> Result<Value, ServiceError> {
        list_files(
            &self.api,
            drive_query(Some(GOOGLE_SHEET_MIME), None),
            max_results,
            "modifiedTime desc",
        )
        .await
    }

    async fn get_item(&self, id: &str) -> Result<Value, ServiceError> {
        let sheet = self
            .api
            .get(
                &item_url(SPREADSHEETS_URL, id)?,
                &[(
                    "fields",
                    "spreadsheetId,spreadsheetUrl,properties.title,sheets.properties.title"
                        .to_string(),
                )],
            )
            .await?;
        Ok(spreadsheet_summary(&sheet))
    }

    async fn create_item(&self, fields: &Parameters) -> Result<Value, ServiceError> {
        let title = fields
            .text("title")
            .ok_or_else(|| ServiceError::Permanent("a spreadsheet needs a title".to_string()))?;
        let mut body = json!({ "properties": { "title": title } });
        if let Some(sheets) = fields.list("sheet_titles") {
            body["sheets"] = sheets
                .iter()
                .map(|name| json!({ "properties": { "title": name } }))
                .collect();
        }
        let created = self.api.post(SPREADSHEETS_URL, &body).await?;
        Ok(spreadsheet_summary(&created))
    }

    async fn update_item(&self, id: &str, fields: &Parameters) -> Result<Value, ServiceError> {
        let changes = fields
            .object("fields")
            .ok_or_else(|| ServiceError::Permanent("nothing to update".to_string()))?;
        self.api
            .post(
                &format!("{}:batchUpdate", item_url(SPREADSHEETS_URL, id)?),
                &properties_update(changes),
            )
            .await?;
        let mut result = Map::new();
        result.insert("id".to_string(), json!(id));
        if let Some(title) = changes.get("title") {
            result.insert("title".to_string(), title.clone());
        }
        Ok(Value::Object(result))
    }

    async fn delete_item(&self, id: &str) -> Result<Value, ServiceError> {
        delete_file(&self.api, id).await
    }

    async fn invoke_extension(&self, operation: &str, params: &Parameters) -> Result<Value, ServiceError> {
        match operation {
            "read_values" => self.read_values(params).await,
            "write_values" => self.write_values(params).await,
            other => Err(ServiceError::Unsupported(other.to_string())),
        }
    }

    // Overwriting a fixed range and setting properties both converge.
    fn is_idempotent(&self, operation: &Operation) -> bool {
        match operation {
            Operation::UpdateItem => true,
            Operation::Extension(name) => name == "write_values",
            _ => false,
        }
    }
}

fn id_and_range(params: &Parameters) -> Result<(&str, &str), ServiceError> {
    let id = params
        .text("id")
        .ok_or_else(|| ServiceError::Permanent("missing spreadsheet id".to_string()))?;
    let range = params
        .text("range")
        .ok_or_else(|| ServiceError::Permanent("missing range".to_string()))?;
    Ok((id, range))
}

fn spreadsheet_summary(sheet: &Value) -> Value {
    let sheets: Vec<Value> = sheet
        .get("sheets")
        .and_then(Value::as_array)
        .map(|tabs| {
            tabs.iter()
                .filter_map(|tab| tab.pointer("/properties/title").cloned())
                .collect()
        })
        .unwrap_or_default();
    json!({
        "id": sheet.get("spreadsheetId"),
        "title": sheet.pointer("/properties/title"),
        "url": sheet.get("spreadsheetUrl"),
        "sheets": sheets,
    })
}

/// One `updateSpreadsheetProperties` request with a field mask of the keys
/// being changed.
fn properties_update(changes: &Map<String, Value>) -> Value {
    let mask: Vec<&str> = changes.keys().map(String::as_str).collect();
    json!({
        "requests": [{
            "updateSpreadsheetProperties": {
                "properties": changes,
                "fields": mask.join(","),
            }
        }]
    })
}
