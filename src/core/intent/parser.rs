// Strict parsing of the model's answer into an Intent.
//
// The model's JSON is untrusted. Names are checked against the registry,
// parameter shapes against the operation schema, and anything the schema
// does not declare is rejected. A partial intent never comes out of here.

use super::models::{ClarificationRequest, Intent, Resolution};
use crate::core::errors::ResolutionError;
use crate::core::registry::{CapabilityRegistry, Operation, OperationDescriptor};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Words that point back at an earlier item instead of naming one.
const BACK_REFERENCES: &[&str] = &[
    "it",
    "this",
    "that",
    "this one",
    "that one",
    "the same",
    "same",
    "same one",
    "the last one",
    "last one",
    "them",
    "him",
    "her",
];

#[derive(Debug, Deserialize)]
struct RawInference {
    capability: Option<String>,
    operation: Option<String>,
    #[serde(default)]
    parameters: Value,
    confidence: Option<Value>,
    clarification: Option<String>,
}

/// Parses raw model output against `registry`, resolving back-references
/// through the session's remembered `entities`.
pub fn parse_inference(
    raw: &str,
    registry: &CapabilityRegistry,
    entities: &HashMap<String, String>,
) -> Result<Resolution, ResolutionError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| ResolutionError::Malformed(preview(raw)))?;
    let parsed: RawInference = serde_json::from_str(json)
        .map_err(|e| ResolutionError::Malformed(format!("{}: {}", e, preview(raw))))?;

    if let Some(question) = parsed
        .clarification
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
    {
        return Ok(Resolution::ClarificationNeeded(ClarificationRequest {
            question: question.to_string(),
            reason: "model asked for clarification".to_string(),
        }));
    }

    let capability = normalize_name(parsed.capability.as_deref())
        .ok_or_else(|| ResolutionError::Malformed("missing capability".to_string()))?;
    let operation = normalize_name(parsed.operation.as_deref())
        .ok_or_else(|| ResolutionError::Malformed("missing operation".to_string()))?;

    let descriptor = registry
        .capability(&capability)
        .ok_or_else(|| ResolutionError::UnknownCapability(capability.clone()))?
        .find_operation(&operation)
        .ok_or_else(|| ResolutionError::UnknownOperation {
            capability: capability.clone(),
            operation: operation.clone(),
        })?;

    let confidence = parse_confidence(parsed.confidence.as_ref())?;

    let mut parameters = match parsed.parameters {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => {
            return Err(ResolutionError::Malformed(format!(
                "parameters must be an object, got {}",
                other
            )))
        }
    };
    // Explicit nulls mean "not given".
    parameters.retain(|_, v| !v.is_null());

    resolve_back_references(&capability, descriptor, &mut parameters, entities);
    validate_parameters(&capability, descriptor, &parameters)?;
    apply_defaults(descriptor, &mut parameters);

    Intent::new(
        capability,
        Operation::parse(&operation),
        parameters,
        confidence,
    )
    .map(Resolution::Resolved)
}

/// Finds the JSON object in a reply that may carry code fences or prose.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

fn normalize_name(name: Option<&str>) -> Option<String> {
    name.map(|n| n.trim().to_lowercase().replace([' ', '-'], "_"))
        .filter(|n| !n.is_empty())
}

/// A missing confidence counts as no confidence at all.
fn parse_confidence(value: Option<&Value>) -> Result<f64, ResolutionError> {
    let confidence = match value {
        None | Some(Value::Null) => return Ok(0.0),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
        Some(_) => None,
    }
    .ok_or_else(|| ResolutionError::Malformed("confidence is not a number".to_string()))?;

    if !(0.0..=1.0).contains(&confidence) || confidence.is_nan() {
        return Err(ResolutionError::ConfidenceOutOfRange(confidence));
    }
    Ok(confidence)
}

fn is_back_reference(value: &Value) -> bool {
    value
        .as_str()
        .map(|s| {
            let s = s.trim().to_lowercase();
            BACK_REFERENCES.contains(&s.as_str())
        })
        .unwrap_or(false)
}

/// Replaces back-references with remembered values, scoped to the intent's
/// own capability.
///
/// - `@key` anywhere becomes the remembered value for `key`.
/// - `id` given as a pronoun becomes `<capability>.last_id`.
/// - mail `to` given as a pronoun becomes `mail.last_recipient`.
///
/// Absent values stay absent. References that cannot be resolved are
/// dropped, so a required parameter shows up as missing rather than as the
/// literal word "it" or "@key".
fn resolve_back_references(
    capability: &str,
    descriptor: &OperationDescriptor,
    parameters: &mut Map<String, Value>,
    entities: &HashMap<String, String>,
) {
    let mut unresolved = Vec::new();
    for (name, value) in parameters.iter_mut() {
        let Some(key) = value.as_str().and_then(|s| s.trim().strip_prefix('@')) else {
            continue;
        };
        match entities.get(key.trim()) {
            Some(remembered) => *value = Value::String(remembered.clone()),
            None => unresolved.push(name.clone()),
        }
    }
    for name in unresolved {
        parameters.remove(&name);
    }

    let mut fill = |name: &str, key: String| {
        if descriptor.find_param(name).is_none() {
            return;
        }
        if !parameters.get(name).map(is_back_reference).unwrap_or(false) {
            return;
        }
        match entities.get(&key) {
            Some(remembered) => {
                parameters.insert(name.to_string(), Value::String(remembered.clone()));
            }
            None => {
                parameters.remove(name);
            }
        }
    };

    fill("id", format!("{}.last_id", capability));
    if capability == "mail" {
        fill("to", "mail.last_recipient".to_string());
    }
}

fn validate_parameters(
    capability: &str,
    descriptor: &OperationDescriptor,
    parameters: &Map<String, Value>,
) -> Result<(), ResolutionError> {
    for (name, value) in parameters {
        let spec = descriptor.find_param(name).ok_or_else(|| {
            ResolutionError::UnexpectedParameter {
                capability: capability.to_string(),
                operation: descriptor.name().to_string(),
                parameter: name.clone(),
            }
        })?;
        if !spec.param_type.accepts_shape(value) {
            return Err(ResolutionError::InvalidParameter {
                parameter: name.clone(),
                expected: spec.param_type.name().to_string(),
            });
        }
    }

    if let Some(missing) = descriptor
        .required_params()
        .find(|spec| !parameters.contains_key(&spec.name))
    {
        return Err(ResolutionError::MissingParameter {
            capability: capability.to_string(),
            operation: descriptor.name().to_string(),
            parameter: missing.name.clone(),
        });
    }

    Ok(())
}

fn apply_defaults(descriptor: &OperationDescriptor, parameters: &mut Map<String, Value>) {
    for spec in &descriptor.params {
        if let Some(default) = &spec.default {
            parameters
                .entry(spec.name.clone())
                .or_insert_with(|| default.clone());
        }
    }
}

fn preview(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() > 120 {
        format!("{}...", trimmed.chars().take(120).collect::<String>())
    } else {
        trimmed.to_string()
    }
}
