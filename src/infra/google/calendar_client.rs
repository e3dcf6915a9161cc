// Calendar v3 events on the primary calendar: the calendar capability.

use super::google_api::{item_url, GoogleApi};
use crate::core::dispatch::{parse_datetime, Parameters, ServiceError, WorkspaceClient};
use crate::core::registry::workspace_catalog::CALENDAR;
use crate::core::registry::Operation;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};

const EVENTS_URL: &str = "https://www.googleapis.com/calendar/v3/calendars/primary/events";

pub struct CalendarClient {
    api: GoogleApi,
}

impl CalendarClient {
    pub fn new(api: GoogleApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl WorkspaceClient for CalendarClient {
    fn capability(&self) -> &str {
        CALENDAR
    }

    async fn list_items(&self, filter: &Parameters, max_results: u32) -> Result<Value, ServiceError> {
        let time_min = filter.datetime("time_min").unwrap_or_else(Utc::now);
        let mut query = vec![
            ("timeMin", time_min.to_rfc3339()),
            ("maxResults", max_results.clamp(1, 2500).to_string()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ];
        if let Some(time_max) = filter.datetime("time_max") {
            query.push(("timeMax", time_max.to_rfc3339()));
        }

        let listing = self.api.get(EVENTS_URL, &query).await?;
        let items: Vec<Value> = listing
            .get("items")
            .and_then(Value::as_array)
            .map(|events| events.iter().map(event_summary).collect())
            .unwrap_or_default();
        Ok(json!({ "items": items }))
    }

    async fn get_item(&self, id: &str) -> Result<Value, ServiceError> {
        self.api
            .get(&item_url(EVENTS_URL, id)?, &[])
            .await
    }

    async fn create_item(&self, fields: &Parameters) -> Result<Value, ServiceError> {
        let body = new_event(fields, Utc::now())?;
        self.api.post(EVENTS_URL, &body).await
    }

    /// Full replacement: read the event, merge the changes, PUT it back.
    async fn update_item(&self, id: &str, fields: &Parameters) -> Result<Value, ServiceError> {
        let changes = fields
            .object("fields")
            .ok_or_else(|| ServiceError::Permanent("nothing to update".to_string()))?;
        let url = item_url(EVENTS_URL, id)?;

        let mut event = match self.api.get(&url, &[]).await? {
            Value::Object(map) => map,
            _ => return Err(ServiceError::Permanent(format!("event {} is malformed", id))),
        };
        merge_event_changes(&mut event, changes)?;

        self.api.put(&url, &[], &Value::Object(event)).await
    }

    async fn delete_item(&self, id: &str) -> Result<Value, ServiceError> {
        self.api.delete(&item_url(EVENTS_URL, id)?).await?;
        Ok(json!({ "id": id, "deleted": true }))
    }

    fn is_idempotent(&self, operation: &Operation) -> bool {
        operation == &Operation::UpdateItem
    }
}

fn event_summary(event: &Value) -> Value {
    json!({
        "id": event.get("id"),
        "summary": event.get("summary"),
        "start": event.pointer("/start/dateTime").or_else(|| event.pointer("/start/date")),
        "end": event.pointer("/end/dateTime").or_else(|| event.pointer("/end/date")),
        "htmlLink": event.get("htmlLink"),
    })
}

fn event_time(at: DateTime<Utc>) -> Value {
    json!({ "dateTime": at.to_rfc3339() })
}

/// Start defaults to `now`, end to one hour after the start.
fn new_event(fields: &Parameters, now: DateTime<Utc>) -> Result<Value, ServiceError> {
    let summary = fields
        .text("summary")
        .ok_or_else(|| ServiceError::Permanent("an event needs a summary".to_string()))?;
    let start = fields.datetime("start_time").unwrap_or(now);
    let end = fields
        .datetime("end_time")
        .unwrap_or(start + Duration::hours(1));
    if end <= start {
        return Err(ServiceError::Permanent(
            "event must end after it starts".to_string(),
        ));
    }

    let mut body = Map::new();
    body.insert("summary".to_string(), json!(summary));
    body.insert("start".to_string(), event_time(start));
    body.insert("end".to_string(), event_time(end));
    if let Some(description) = fields.text("description") {
        body.insert("description".to_string(), json!(description));
    }
    if let Some(attendees) = fields.list("attendees") {
        let attendees: Vec<Value> = attendees.iter().map(|a| json!({ "email": a })).collect();
        body.insert("attendees".to_string(), Value::Array(attendees));
    }
    Ok(Value::Object(body))
}

/// Copies changes onto the event. `start_time` and `end_time` are accepted
/// as plain timestamps; every other key is taken as an event field.
fn merge_event_changes(
    event: &mut Map<String, Value>,
    changes: &Map<String, Value>,
) -> Result<(), ServiceError> {
    for (key, value) in changes {
        let target = match key.as_str() {
            "start_time" => "start",
            "end_time" => "end",
            other => {
                event.insert(other.to_string(), value.clone());
                continue;
            }
        };
        let at = value
            .as_str()
            .and_then(parse_datetime)
            .ok_or_else(|| ServiceError::Permanent(format!("{} is not a timestamp", key)))?;
        event.insert(target.to_string(), event_time(at));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatch::ParamValue;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn new_event_defaults_to_one_hour_from_now() {
        let fields = Parameters::new().with("summary", ParamValue::Text("Standup".into()));
        let event = new_event(&fields, now()).unwrap();
        assert_eq!(event["summary"], "Standup");
        assert_eq!(event["start"]["dateTime"], "2024-03-01T09:00:00+00:00");
        assert_eq!(event["end"]["dateTime"], "2024-03-01T10:00:00+00:00");
        assert!(event.get("attendees").is_none());
    }

    #[test]
    fn new_event_rejects_inverted_range() {
        let fields = Parameters::new()
            .with("summary", ParamValue::Text("Backwards".into()))
            .with("start_time", ParamValue::DateTime(now()))
            .with("end_time", ParamValue::DateTime(now() - Duration::minutes(5)));
        assert!(matches!(
            new_event(&fields, now()),
            Err(ServiceError::Permanent(_))
        ));
    }

    #[test]
    fn attendees_become_email_objects() {
        let fields = Parameters::new()
            .with("summary", ParamValue::Text("Review".into()))
            .with(
                "attendees",
                ParamValue::EmailList(vec!["a@example.com".into(), "b@example.com".into()]),
            );
        let event = new_event(&fields, now()).unwrap();
        assert_eq!(event["attendees"][1]["email"], "b@example.com");
    }

    #[test]
    fn merge_maps_friendly_time_keys() {
        let mut event = json!({"id": "e1", "summary": "Old", "start": {"dateTime": "x"}})
            .as_object()
            .cloned()
            .unwrap();
        let changes = json!({"summary": "New", "start_time": "2024-03-02T10:00:00Z"})
            .as_object()
            .cloned()
            .unwrap();

        merge_event_changes(&mut event, &changes).unwrap();
        assert_eq!(event["summary"], "New");
        assert_eq!(event["start"]["dateTime"], "2024-03-02T10:00:00+00:00");
        assert_eq!(event["id"], "e1");
    }

    #[test]
    fn merge_rejects_unparseable_time() {
        let mut event = Map::new();
        let changes = json!({"end_time": "next tuesday"}).as_object().cloned().unwrap();
        assert!(merge_event_changes(&mut event, &changes).is_err());
    }
}
