// Converts validated intent parameters into typed values.
//
// The resolver only checks that each value has the right JSON shape. Here we
// do the real conversion, and anything that does not convert stops the
// dispatch before a service client sees it.

use crate::core::errors::CoercionError;
use crate::core::intent::Intent;
use crate::core::registry::{OperationDescriptor, ParamType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// ============================================================================
// TYPED PARAMETERS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Count(u32),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Email(String),
    TextList(Vec<String>),
    EmailList(Vec<String>),
    Table(Vec<Vec<Value>>),
    Object(Map<String, Value>),
}

impl ParamValue {
    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Text(s) | ParamValue::Email(s) => Value::String(s.clone()),
            ParamValue::Count(n) => Value::from(*n),
            ParamValue::Boolean(b) => Value::Bool(*b),
            ParamValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
            ParamValue::TextList(items) | ParamValue::EmailList(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
            ParamValue::Table(rows) => {
                Value::Array(rows.iter().cloned().map(Value::Array).collect())
            }
            ParamValue::Object(map) => Value::Object(map.clone()),
        }
    }
}

/// Typed parameters handed to a [`WorkspaceClient`](super::WorkspaceClient).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    values: BTreeMap<String, ParamValue>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    pub fn with(mut self, name: &str, value: ParamValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Text or email value.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name)? {
            ParamValue::Text(s) | ParamValue::Email(s) => Some(s),
            _ => None,
        }
    }

    pub fn count(&self, name: &str) -> Option<u32> {
        match self.values.get(name)? {
            ParamValue::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn datetime(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.values.get(name)? {
            ParamValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn list(&self, name: &str) -> Option<&[String]> {
        match self.values.get(name)? {
            ParamValue::TextList(items) | ParamValue::EmailList(items) => Some(items),
            _ => None,
        }
    }

    pub fn table(&self, name: &str) -> Option<&[Vec<Value>]> {
        match self.values.get(name)? {
            ParamValue::Table(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn object(&self, name: &str) -> Option<&Map<String, Value>> {
        match self.values.get(name)? {
            ParamValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

// ============================================================================
// COERCION
// ============================================================================

/// Converts every parameter of `intent` to the type `descriptor` declares.
pub fn coerce_parameters(
    intent: &Intent,
    descriptor: &OperationDescriptor,
) -> Result<Parameters, CoercionError> {
    let mut params = Parameters::new();

    for (name, raw) in intent.parameters() {
        let Some(spec) = descriptor.find_param(name) else {
            return Err(CoercionError {
                parameter: name.clone(),
                expected: "a declared parameter".to_string(),
                reason: format!("{} does not take '{}'", intent.label(), name),
            });
        };
        let mut value = coerce_value(name, spec.param_type, raw)?;
        if let ParamValue::Object(map) = &mut value {
            coerce_typed_keys(name, &spec.typed_keys, map)?;
        }
        params.insert(name.clone(), value);
    }

    for spec in descriptor.required_params() {
        if !params.contains(&spec.name) {
            return Err(CoercionError {
                parameter: spec.name.clone(),
                expected: spec.param_type.name().to_string(),
                reason: "required parameter is missing".to_string(),
            });
        }
    }

    Ok(params)
}

pub fn coerce_value(
    name: &str,
    param_type: ParamType,
    raw: &Value,
) -> Result<ParamValue, CoercionError> {
    let fail = |reason: String| CoercionError {
        parameter: name.to_string(),
        expected: param_type.name().to_string(),
        reason,
    };

    match param_type {
        ParamType::Text => match raw {
            Value::String(s) => Ok(ParamValue::Text(s.clone())),
            Value::Number(n) => Ok(ParamValue::Text(n.to_string())),
            Value::Bool(b) => Ok(ParamValue::Text(b.to_string())),
            other => Err(fail(format!("got {}", shape_name(other)))),
        },
        ParamType::Count => {
            let n = match raw {
                Value::Number(n) => n
                    .as_u64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
                Value::String(s) => s.trim().parse::<u64>().ok(),
                _ => None,
            }
            .ok_or_else(|| fail(format!("'{}' is not a whole number", raw_text(raw))))?;
            if n == 0 {
                return Err(fail("must be at least 1".to_string()));
            }
            u32::try_from(n)
                .map(ParamValue::Count)
                .map_err(|_| fail(format!("{} is too large", n)))
        }
        ParamType::Boolean => match raw {
            Value::Bool(b) => Ok(ParamValue::Boolean(*b)),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Ok(ParamValue::Boolean(true)),
                "false" | "no" | "n" | "0" => Ok(ParamValue::Boolean(false)),
                _ => Err(fail(format!("'{}' is not yes or no", s))),
            },
            other => Err(fail(format!("got {}", shape_name(other)))),
        },
        ParamType::DateTime => {
            let text = raw
                .as_str()
                .ok_or_else(|| fail(format!("got {}", shape_name(raw))))?;
            parse_datetime(text)
                .map(ParamValue::DateTime)
                .ok_or_else(|| fail(format!("'{}' is not a date or time I understand", text)))
        }
        ParamType::Email => {
            let text = raw
                .as_str()
                .ok_or_else(|| fail(format!("got {}", shape_name(raw))))?;
            parse_email(text)
                .map(ParamValue::Email)
                .ok_or_else(|| fail(format!("'{}' is not an email address", text)))
        }
        ParamType::TextList => Ok(ParamValue::TextList(
            split_list(raw).map_err(|shape| fail(format!("got {}", shape)))?,
        )),
        ParamType::EmailList => {
            let items = split_list(raw).map_err(|shape| fail(format!("got {}", shape)))?;
            let mut emails = Vec::with_capacity(items.len());
            for item in items {
                let email = parse_email(&item)
                    .ok_or_else(|| fail(format!("'{}' is not an email address", item)))?;
                emails.push(email);
            }
            Ok(ParamValue::EmailList(emails))
        }
        ParamType::Table => {
            let rows = raw
                .as_array()
                .ok_or_else(|| fail(format!("got {}", shape_name(raw))))?;
            // A flat list of cells is one row.
            if rows.iter().all(is_cell) {
                return Ok(ParamValue::Table(vec![rows.clone()]));
            }
            let mut table = Vec::with_capacity(rows.len());
            for row in rows {
                match row.as_array() {
                    Some(cells) if cells.iter().all(is_cell) => table.push(cells.clone()),
                    _ => return Err(fail("every row must be a list of plain cell values".to_string())),
                }
            }
            Ok(ParamValue::Table(table))
        }
        ParamType::Object => raw
            .as_object()
            .cloned()
            .map(ParamValue::Object)
            .ok_or_else(|| fail(format!("got {}", shape_name(raw)))),
    }
}

/// Converts declared keys inside an object parameter in place, so a bad
/// `fields.start_time` fails here like a top-level parameter would.
fn coerce_typed_keys(
    name: &str,
    typed_keys: &[(String, ParamType)],
    map: &mut Map<String, Value>,
) -> Result<(), CoercionError> {
    for (key, param_type) in typed_keys {
        let Some(raw) = map.get(key) else {
            continue;
        };
        let typed = coerce_value(&format!("{}.{}", name, key), *param_type, raw)?;
        map.insert(key.clone(), typed.to_json());
    }
    Ok(())
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM[:SS]` (read as UTC) and plain dates
/// (midnight UTC).
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Accepts `a@b.com` or `Name <a@b.com>` and returns the bare address.
pub fn parse_email(text: &str) -> Option<String> {
    let text = text.trim();
    let address = match (text.rfind('<'), text.rfind('>')) {
        (Some(open), Some(close)) if open < close => &text[open + 1..close],
        _ => text,
    }
    .trim();

    let (local, domain) = address.split_once('@')?;
    let valid = !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !address.chars().any(char::is_whitespace);
    valid.then(|| address.to_string())
}

fn split_list(raw: &Value) -> Result<Vec<String>, &'static str> {
    let items: Vec<String> = match raw {
        Value::String(s) => s.split(',').map(|p| p.trim().to_string()).collect(),
        Value::Array(values) => values
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.trim().to_string()),
                Value::Number(_) | Value::Bool(_) => Ok(v.to_string()),
                other => Err(shape_name(other)),
            })
            .collect::<Result<_, _>>()?,
        other => return Err(shape_name(other)),
    };
    Ok(items.into_iter().filter(|s| !s.is_empty()).collect())
}

fn is_cell(value: &Value) -> bool {
    matches!(
        value,
        Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null
    )
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "nothing",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "text",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn raw_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::{workspace_catalog, Operation};
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    fn intent(capability: &str, operation: &str, params: Value) -> Intent {
        Intent::new(
            capability,
            Operation::parse(operation),
            params.as_object().cloned().unwrap_or_default(),
            0.9,
        )
        .unwrap()
    }

    #[test]
    fn datetime_accepts_common_forms() {
        let rfc = parse_datetime("2024-03-01T09:30:00+02:00").unwrap();
        assert_eq!(rfc.hour(), 7);

        let naive = parse_datetime("2024-03-01T09:30").unwrap();
        assert_eq!((naive.hour(), naive.minute()), (9, 30));

        let date = parse_datetime("2024-03-01").unwrap();
        assert_eq!((date.month(), date.day(), date.hour()), (3, 1, 0));

        assert!(parse_datetime("next tuesday").is_none());
    }

    #[test]
    fn email_accepts_display_names() {
        assert_eq!(
            parse_email("Alice <alice@example.com>").as_deref(),
            Some("alice@example.com")
        );
        assert_eq!(parse_email(" bob@example.org ").as_deref(), Some("bob@example.org"));
        assert!(parse_email("bob").is_none());
        assert!(parse_email("bob@localhost").is_none());
        assert!(parse_email("a b@example.com").is_none());
    }

    #[test]
    fn count_rejects_zero_and_fractions() {
        assert_eq!(
            coerce_value("max_results", ParamType::Count, &json!("5")).unwrap(),
            ParamValue::Count(5)
        );
        assert_eq!(
            coerce_value("max_results", ParamType::Count, &json!(5.0)).unwrap(),
            ParamValue::Count(5)
        );
        assert!(coerce_value("max_results", ParamType::Count, &json!(0)).is_err());
        assert!(coerce_value("max_results", ParamType::Count, &json!(2.5)).is_err());
        assert!(coerce_value("max_results", ParamType::Count, &json!("many")).is_err());
    }

    #[test]
    fn lists_accept_comma_separated_text() {
        assert_eq!(
            coerce_value("labels", ParamType::TextList, &json!("INBOX, STARRED,")).unwrap(),
            ParamValue::TextList(vec!["INBOX".into(), "STARRED".into()])
        );
        let err = coerce_value("attendees", ParamType::EmailList, &json!(["a@x.com", "nope"]))
            .unwrap_err();
        assert_eq!(err.parameter, "attendees");
    }

    #[test]
    fn flat_table_becomes_single_row() {
        assert_eq!(
            coerce_value("values", ParamType::Table, &json!(["a", 1, true])).unwrap(),
            ParamValue::Table(vec![vec![json!("a"), json!(1), json!(true)]])
        );
        assert!(coerce_value("values", ParamType::Table, &json!([["a"], [{"x": 1}]])).is_err());
    }

    #[test]
    fn coerce_parameters_types_every_value() {
        let registry = workspace_catalog().unwrap();
        let descriptor = registry.resolve("calendar", "create_item").unwrap();
        let intent = intent(
            "calendar",
            "create_item",
            json!({
                "summary": "Standup",
                "start_time": "2024-05-01T09:00",
                "attendees": "a@x.com, Bob <b@x.com>"
            }),
        );

        let params = coerce_parameters(&intent, descriptor).unwrap();
        assert_eq!(params.text("summary"), Some("Standup"));
        assert!(params.datetime("start_time").is_some());
        assert_eq!(
            params.list("attendees"),
            Some(&["a@x.com".to_string(), "b@x.com".to_string()][..])
        );
    }

    #[test]
    fn unparseable_date_is_a_coercion_error() {
        let registry = workspace_catalog().unwrap();
        let descriptor = registry.resolve("calendar", "create_item").unwrap();
        let intent = intent(
            "calendar",
            "create_item",
            json!({"summary": "Standup", "start_time": "sometime soon"}),
        );

        let err = coerce_parameters(&intent, descriptor).unwrap_err();
        assert_eq!(err.parameter, "start_time");
    }

    #[test]
    fn typed_keys_inside_fields_are_normalized() {
        let registry = workspace_catalog().unwrap();
        let descriptor = registry.resolve("calendar", "update_item").unwrap();
        let intent = intent(
            "calendar",
            "update_item",
            json!({"id": "e1", "fields": {"summary": "Sync", "start_time": "2024-05-01 09:30"}}),
        );

        let params = coerce_parameters(&intent, descriptor).unwrap();
        let fields = params.object("fields").unwrap();
        assert_eq!(fields["start_time"], json!("2024-05-01T09:30:00+00:00"));
        assert_eq!(fields["summary"], json!("Sync"));
    }

    #[test]
    fn bad_typed_key_names_its_path() {
        let registry = workspace_catalog().unwrap();
        let descriptor = registry.resolve("calendar", "update_item").unwrap();
        let intent = intent(
            "calendar",
            "update_item",
            json!({"id": "e1", "fields": {"start_time": "tomorrow-ish"}}),
        );

        let err = coerce_parameters(&intent, descriptor).unwrap_err();
        assert_eq!(err.parameter, "fields.start_time");
        assert_eq!(err.expected, "date/time");
    }

    #[test]
    fn missing_required_parameter_is_caught() {
        let registry = workspace_catalog().unwrap();
        let descriptor = registry.resolve("mail", "create_item").unwrap();
        let intent = intent("mail", "create_item", json!({"to": "a@b.com", "subject": "Hi"}));
        let err = coerce_parameters(&intent, descriptor).unwrap_err();
        assert_eq!(err.parameter, "body");
    }
}
