// The default capability set: the five workspace service areas.

use super::capability_registry::CapabilityRegistry;
use super::schema::{CapabilityDescriptor, OperationDescriptor, ParamSpec, ParamType};
use crate::core::errors::RegistryError;
use serde_json::json;

pub const MAIL: &str = "mail";
pub const CALENDAR: &str = "calendar";
pub const STORAGE: &str = "storage";
pub const SPREADSHEET: &str = "spreadsheet";
pub const DOCUMENT: &str = "document";

pub const GOOGLE_DOC_MIME: &str = "application/vnd.google-apps.document";
pub const GOOGLE_SHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

/// Builds a registry with every workspace capability registered.
pub fn workspace_catalog() -> Result<CapabilityRegistry, RegistryError> {
    let mut registry = CapabilityRegistry::new();
    registry.register(mail())?;
    registry.register(calendar())?;
    registry.register(storage())?;
    registry.register(spreadsheet())?;
    registry.register(document())?;
    Ok(registry)
}

fn id_param(what: &str) -> ParamSpec {
    ParamSpec::required("id", ParamType::Text, &format!("Identifier of the {}", what))
}

fn max_results() -> ParamSpec {
    ParamSpec::with_default(
        "max_results",
        ParamType::Count,
        json!(10),
        "How many items to return",
    )
}

fn fields_param() -> ParamSpec {
    ParamSpec::required(
        "fields",
        ParamType::Object,
        "Field names and their new values",
    )
}

pub fn mail() -> CapabilityDescriptor {
    CapabilityDescriptor::new(MAIL, "Email messages in the user's mailbox")
        .operation(
            OperationDescriptor::new("list_items", "List recent messages")
                .param(ParamSpec::optional(
                    "query",
                    ParamType::Text,
                    "Mail search query, e.g. 'from:alice is:unread'",
                ))
                .param(max_results())
                .param(ParamSpec::optional(
                    "label_ids",
                    ParamType::TextList,
                    "Only messages carrying these labels, e.g. INBOX",
                )),
        )
        .operation(
            OperationDescriptor::new("get_item", "Read one message").param(id_param("message")),
        )
        .operation(
            OperationDescriptor::new("create_item", "Send a new email")
                .param(ParamSpec::required("to", ParamType::Email, "Recipient address"))
                .param(ParamSpec::required("subject", ParamType::Text, "Subject line"))
                .param(ParamSpec::required("body", ParamType::Text, "Plain text body"))
                .param(ParamSpec::optional(
                    "html_body",
                    ParamType::Text,
                    "Optional HTML version of the body",
                )),
        )
        .operation(
            OperationDescriptor::new("update_item", "Add or remove labels on a message")
                .param(id_param("message"))
                .param(ParamSpec::optional(
                    "add_labels",
                    ParamType::TextList,
                    "Labels to add, e.g. STARRED",
                ))
                .param(ParamSpec::optional(
                    "remove_labels",
                    ParamType::TextList,
                    "Labels to remove, e.g. UNREAD",
                )),
        )
        .operation(
            OperationDescriptor::new("delete_item", "Permanently delete a message")
                .param(id_param("message")),
        )
}

pub fn calendar() -> CapabilityDescriptor {
    CapabilityDescriptor::new(CALENDAR, "Events on the user's primary calendar")
        .operation(
            OperationDescriptor::new("list_items", "List upcoming events")
                .param(max_results())
                .param(ParamSpec::optional(
                    "time_min",
                    ParamType::DateTime,
                    "Earliest start time, defaults to now",
                ))
                .param(ParamSpec::optional(
                    "time_max",
                    ParamType::DateTime,
                    "Latest start time",
                )),
        )
        .operation(
            OperationDescriptor::new("get_item", "Read one event").param(id_param("event")),
        )
        .operation(
            OperationDescriptor::new("create_item", "Create an event")
                .param(ParamSpec::required("summary", ParamType::Text, "Event title"))
                .param(ParamSpec::optional(
                    "start_time",
                    ParamType::DateTime,
                    "Start time, defaults to now",
                ))
                .param(ParamSpec::optional(
                    "end_time",
                    ParamType::DateTime,
                    "End time, defaults to one hour after the start",
                ))
                .param(ParamSpec::optional(
                    "description",
                    ParamType::Text,
                    "Event description",
                ))
                .param(ParamSpec::optional(
                    "attendees",
                    ParamType::EmailList,
                    "Guest email addresses",
                )),
        )
        .operation(
            OperationDescriptor::new("update_item", "Replace fields of an event")
                .param(id_param("event"))
                .param(
                    fields_param()
                        .typed_key("start_time", ParamType::DateTime)
                        .typed_key("end_time", ParamType::DateTime),
                ),
        )
        .operation(
            OperationDescriptor::new("delete_item", "Delete an event").param(id_param("event")),
        )
}

pub fn storage() -> CapabilityDescriptor {
    CapabilityDescriptor::new(STORAGE, "Files in the user's drive")
        .operation(
            OperationDescriptor::new("list_items", "List files, most recently modified first")
                .param(ParamSpec::optional(
                    "query",
                    ParamType::Text,
                    "Drive search query, e.g. \"name contains 'report'\"",
                ))
                .param(max_results())
                .param(ParamSpec::with_default(
                    "order_by",
                    ParamType::Text,
                    json!("modifiedTime desc"),
                    "Sort order",
                )),
        )
        .operation(
            OperationDescriptor::new("get_item", "Read file metadata").param(id_param("file")),
        )
        .operation(
            OperationDescriptor::new("create_item", "Create an empty file")
                .param(ParamSpec::required("name", ParamType::Text, "File name"))
                .param(ParamSpec::with_default(
                    "mime_type",
                    ParamType::Text,
                    json!(GOOGLE_DOC_MIME),
                    "MIME type of the new file",
                ))
                .param(ParamSpec::optional(
                    "parent_id",
                    ParamType::Text,
                    "Folder to create the file in",
                )),
        )
        .operation(
            OperationDescriptor::new("update_item", "Rename or otherwise update file metadata")
                .param(id_param("file"))
                .param(fields_param()),
        )
        .operation(
            OperationDescriptor::new("delete_item", "Delete a file").param(id_param("file")),
        )
}

pub fn spreadsheet() -> CapabilityDescriptor {
    CapabilityDescriptor::new(SPREADSHEET, "Spreadsheets and their cell values")
        .operation(OperationDescriptor::new("list_items", "List spreadsheets").param(max_results()))
        .operation(
            OperationDescriptor::new("get_item", "Read spreadsheet metadata and sheet names")
                .param(id_param("spreadsheet")),
        )
        .operation(
            OperationDescriptor::new("create_item", "Create a spreadsheet")
                .param(ParamSpec::required("title", ParamType::Text, "Spreadsheet title"))
                .param(ParamSpec::optional(
                    "sheet_titles",
                    ParamType::TextList,
                    "Names of the sheets to create",
                )),
        )
        .operation(
            OperationDescriptor::new("update_item", "Update spreadsheet properties such as title")
                .param(id_param("spreadsheet"))
                .param(fields_param()),
        )
        .operation(
            OperationDescriptor::new("delete_item", "Delete a spreadsheet")
                .param(id_param("spreadsheet")),
        )
        .operation(
            OperationDescriptor::new("read_values", "Read cell values from a range")
                .read_only()
                .param(id_param("spreadsheet"))
                .param(ParamSpec::required(
                    "range",
                    ParamType::Text,
                    "A1 range, e.g. Sheet1!A1:C10",
                )),
        )
        .operation(
            OperationDescriptor::new("write_values", "Overwrite cell values in a range")
                .param(id_param("spreadsheet"))
                .param(ParamSpec::required(
                    "range",
                    ParamType::Text,
                    "A1 range, e.g. Sheet1!A1",
                ))
                .param(ParamSpec::required(
                    "values",
                    ParamType::Table,
                    "Rows of cell values",
                )),
        )
}

pub fn document() -> CapabilityDescriptor {
    CapabilityDescriptor::new(DOCUMENT, "Text documents")
        .operation(OperationDescriptor::new("list_items", "List documents").param(max_results()))
        .operation(
            OperationDescriptor::new("get_item", "Read a document and its text")
                .param(id_param("document")),
        )
        .operation(
            OperationDescriptor::new("create_item", "Create a document")
                .param(ParamSpec::required("title", ParamType::Text, "Document title"))
                .param(ParamSpec::optional(
                    "content",
                    ParamType::Text,
                    "Initial text of the document",
                )),
        )
        .operation(
            OperationDescriptor::new("update_item", "Apply raw document update requests")
                .param(id_param("document"))
                .param(fields_param()),
        )
        .operation(
            OperationDescriptor::new("delete_item", "Delete a document")
                .param(id_param("document")),
        )
        .operation(
            OperationDescriptor::new("append_text", "Append text to the end of a document")
                .param(id_param("document"))
                .param(ParamSpec::required("text", ParamType::Text, "Text to append")),
        )
}
