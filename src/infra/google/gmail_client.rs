// Gmail v1: the mail capability.

use super::google_api::{item_url, GoogleApi};
use crate::core::dispatch::{Parameters, ServiceError, WorkspaceClient};
use crate::core::registry::workspace_catalog::MAIL;
use crate::core::registry::Operation;
use async_trait::async_trait;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use serde_json::{json, Value};

const MESSAGES_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages";
const MIME_BOUNDARY: &str = "workspace-router-alt";

// Gmail pads some body parts and not others.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub struct GmailClient {
    api: GoogleApi,
}

impl GmailClient {
    pub fn new(api: GoogleApi) -> Self {
        Self { api }
    }

    async fn message_summary(&self, id: &str) -> Result<Value, ServiceError> {
        let message = self
            .api
            .get(
                &item_url(MESSAGES_URL, id)?,
                &[
                    ("format", "metadata".to_string()),
                    ("metadataHeaders", "Subject".to_string()),
                    ("metadataHeaders", "From".to_string()),
                    ("metadataHeaders", "Date".to_string()),
                ],
            )
            .await?;
        Ok(json!({
            "id": id,
            "threadId": message.get("threadId"),
            "subject": header(&message, "Subject"),
            "from": header(&message, "From"),
            "date": header(&message, "Date"),
            "snippet": message.get("snippet"),
        }))
    }
}

#[async_trait]
impl WorkspaceClient for GmailClient {
    fn capability(&self) -> &str {
        MAIL
    }

    async fn list_items(&self, filter: &Parameters, max_results: u32) -> Result<Value, ServiceError> {
        let mut query = vec![("maxResults", max_results.clamp(1, 500).to_string())];
        if let Some(q) = filter.text("query") {
            query.push(("q", q.to_string()));
        }
        for label in filter.list("label_ids").unwrap_or_default() {
            query.push(("labelIds", label.clone()));
        }

        let listing = self.api.get(MESSAGES_URL, &query).await?;
        let ids: Vec<String> = listing
            .get("messages")
            .and_then(Value::as_array)
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|m| m.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        // The listing only carries ids; fetch headers so results are readable.
        let mut items = Vec::with_capacity(ids.len());
        for id in &ids {
            items.push(self.message_summary(id).await?);
        }
        Ok(json!({ "items": items }))
    }

    async fn get_item(&self, id: &str) -> Result<Value, ServiceError> {
        let message = self
            .api
            .get(
                &item_url(MESSAGES_URL, id)?,
                &[("format", "full".to_string())],
            )
            .await?;
        Ok(json!({
            "id": id,
            "threadId": message.get("threadId"),
            "labelIds": message.get("labelIds"),
            "subject": header(&message, "Subject"),
            "from": header(&message, "From"),
            "to": header(&message, "To"),
            "date": header(&message, "Date"),
            "snippet": message.get("snippet"),
            "body": message.get("payload").and_then(plain_text_body),
        }))
    }

    async fn create_item(&self, fields: &Parameters) -> Result<Value, ServiceError> {
        let to = fields
            .text("to")
            .ok_or_else(|| ServiceError::Permanent("a message needs a recipient".to_string()))?;
        let subject = fields.text("subject").unwrap_or_default();
        let body = fields.text("body").unwrap_or_default();
        let raw = build_mime(to, subject, body, fields.text("html_body"));

        let sent = self
            .api
            .post(
                &format!("{}/send", MESSAGES_URL),
                &json!({ "raw": URL_SAFE.encode(raw.as_bytes()) }),
            )
            .await?;
        Ok(json!({
            "id": sent.get("id"),
            "threadId": sent.get("threadId"),
            "subject": subject,
            "to": to,
        }))
    }

    async fn update_item(&self, id: &str, fields: &Parameters) -> Result<Value, ServiceError> {
        let add = fields.list("add_labels").unwrap_or_default();
        let remove = fields.list("remove_labels").unwrap_or_default();
        if add.is_empty() && remove.is_empty() {
            return Err(ServiceError::Permanent(
                "no labels to add or remove".to_string(),
            ));
        }
        self.api
            .post(
                &format!("{}/modify", item_url(MESSAGES_URL, id)?),
                &json!({ "addLabelIds": add, "removeLabelIds": remove }),
            )
            .await
    }

    async fn delete_item(&self, id: &str) -> Result<Value, ServiceError> {
        self.api
            .delete(&item_url(MESSAGES_URL, id)?)
            .await?;
        Ok(json!({ "id": id, "deleted": true }))
    }

    // Adding or removing the same labels twice is a no-op.
    fn is_idempotent(&self, operation: &Operation) -> bool {
        operation == &Operation::UpdateItem
    }
}

// ============================================================================
// MESSAGE HELPERS
// ============================================================================

fn header(message: &Value, name: &str) -> Option<String> {
    message
        .pointer("/payload/headers")?
        .as_array()?
        .iter()
        .find(|h| {
            h.get("name")
                .and_then(Value::as_str)
                .map(|n| n.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
        .and_then(|h| h.get("value").and_then(Value::as_str))
        .map(str::to_string)
}

/// Depth-first search for the first `text/plain` part.
fn plain_text_body(part: &Value) -> Option<String> {
    let mime = part.get("mimeType").and_then(Value::as_str).unwrap_or("");
    if mime == "text/plain" {
        let data = part.pointer("/body/data").and_then(Value::as_str)?;
        let bytes = BODY_ENGINE.decode(data).ok()?;
        return Some(String::from_utf8_lossy(&bytes).into_owned());
    }
    part.get("parts")?
        .as_array()?
        .iter()
        .find_map(plain_text_body)
}

/// Header values must stay on one line.
fn header_safe(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// RFC 2047 encoded-word for non-ASCII subjects.
fn encode_subject(subject: &str) -> String {
    let subject = header_safe(subject);
    if subject.is_ascii() {
        subject
    } else {
        format!(
            "=?UTF-8?B?{}?=",
            base64::engine::general_purpose::STANDARD.encode(subject.as_bytes())
        )
    }
}

fn build_mime(to: &str, subject: &str, body: &str, html_body: Option<&str>) -> String {
    let mut mime = format!(
        "To: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\n",
        header_safe(to),
        encode_subject(subject)
    );

    match html_body {
        None => {
            mime.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n\r\n");
            mime.push_str(body);
        }
        Some(html) => {
            mime.push_str(&format!(
                "Content-Type: multipart/alternative; boundary=\"{b}\"\r\n\r\n\
                 --{b}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{text}\r\n\
                 --{b}\r\nContent-Type: text/html; charset=\"UTF-8\"\r\n\r\n{html}\r\n\
                 --{b}--",
                b = MIME_BOUNDARY,
                text = body,
                html = html,
            ));
        }
    }
    mime
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_message_has_headers_then_body() {
        let mime = build_mime("bob@example.com", "Hi", "See you soon", None);
        assert!(mime.starts_with("To: bob@example.com\r\nSubject: Hi\r\n"));
        assert!(mime.contains("Content-Type: text/plain"));
        assert!(mime.ends_with("\r\n\r\nSee you soon"));
    }

    #[test]
    fn header_injection_is_flattened() {
        let mime = build_mime("bob@example.com\r\nBcc: eve@example.com", "Hi", "x", None);
        assert!(!mime.contains("\r\nBcc:"));
    }

    #[test]
    fn html_body_makes_multipart() {
        let mime = build_mime("bob@example.com", "Hi", "plain", Some("<b>bold</b>"));
        assert!(mime.contains("multipart/alternative"));
        assert!(mime.contains("<b>bold</b>"));
        assert!(mime.ends_with("--workspace-router-alt--"));
    }

    #[test]
    fn non_ascii_subject_is_encoded() {
        assert_eq!(encode_subject("Plain"), "Plain");
        assert!(encode_subject("Grüße").starts_with("=?UTF-8?B?"));
    }

    #[test]
    fn finds_nested_plain_text_part() {
        let payload = json!({
            "mimeType": "multipart/alternative",
            "parts": [
                {"mimeType": "text/html", "body": {"data": "PGI-aGk8L2I-"}},
                {"mimeType": "text/plain", "body": {"data": URL_SAFE.encode("hello there")}}
            ]
        });
        assert_eq!(plain_text_body(&payload).as_deref(), Some("hello there"));
    }

    #[test]
    fn unpadded_body_data_decodes() {
        let payload = json!({"mimeType": "text/plain", "body": {"data": "aGk"}});
        assert_eq!(plain_text_body(&payload).as_deref(), Some("hi"));
    }

    #[test]
    fn headers_are_case_insensitive() {
        let message = json!({"payload": {"headers": [{"name": "subject", "value": "Lunch"}]}});
        assert_eq!(header(&message, "Subject").as_deref(), Some("Lunch"));
        assert_eq!(header(&message, "From"), None);
    }
}
