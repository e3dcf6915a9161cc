use crate::core::errors::ResolutionError;
use crate::core::registry::Operation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A resolved (capability, operation, parameters) triple.
///
/// Built once per request and never patched afterwards. A low-confidence or
/// invalid intent is replaced by a fresh resolution, so there are no setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    capability: String,
    operation: Operation,
    parameters: Map<String, Value>,
    confidence: f64,
}

impl Intent {
    pub fn new(
        capability: impl Into<String>,
        operation: Operation,
        parameters: Map<String, Value>,
        confidence: f64,
    ) -> Result<Self, ResolutionError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ResolutionError::ConfidenceOutOfRange(confidence));
        }
        Ok(Self {
            capability: capability.into(),
            operation,
            parameters,
            confidence,
        })
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// `capability.operation`, handy for logs.
    pub fn label(&self) -> String {
        format!("{}.{}", self.capability, self.operation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    /// Shown to the user verbatim.
    pub question: String,
    /// Why we are asking, for logs and the turn record.
    pub reason: String,
}

/// What the resolver hands back for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(Intent),
    ClarificationNeeded(ClarificationRequest),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn intent_rejects_out_of_range_confidence() {
        let err = Intent::new("mail", Operation::ListItems, Map::new(), 1.5).unwrap_err();
        assert_eq!(err, ResolutionError::ConfidenceOutOfRange(1.5));
    }

    #[test]
    fn intent_serializes_operation_as_plain_name() {
        let mut params = Map::new();
        params.insert("max_results".into(), json!(5));
        let intent = Intent::new("calendar", Operation::ListItems, params, 0.9).unwrap();

        let value = serde_json::to_value(&intent).unwrap();
        assert_eq!(value["operation"], json!("list_items"));
        assert_eq!(intent.label(), "calendar.list_items");

        let back: Intent = serde_json::from_value(value).unwrap();
        assert_eq!(back, intent);
    }
}
